//! Ground station motion and telemetry core (`spec.md` §2): the library
//! wiring the five components — frame codec (in `servo-proto`), bus
//! arbiter, axis controllers, sensor reader, telemetry broadcaster — behind
//! a single `GroundStation` facade that an out-of-process HTTP/WebSocket
//! layer (not part of this crate) drives (§6, "Operator surface").

pub mod axis;
pub mod bus;
pub mod config;
pub mod error;
pub mod sensors;
pub mod telemetry;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use axis::AxisHandle;
use bus::{BusArbiter, ResponseLen};
pub use config::MovementMode;
use config::Config;
use error::{AxisError, Health, OperatorError};
use servo_proto::frame::REQUEST_HEADER;
use servo_proto::AxisTag;
use sensors::SensorReader;
use telemetry::{axis_health, compose_snapshot, Snapshot, Subscription, TelemetryBroadcaster};

/// Default timeout for `raw_transact` diagnostic calls, since the caller
/// does not know the exact response length of an arbitrary command.
const RAW_TRANSACT_TIMEOUT: Duration = Duration::from_millis(500);
const RAW_TRANSACT_MAX_RESPONSE: usize = 64;

/// Every background task this crate spawns, kept so `shutdown` can await
/// them inside the grace window (§5, "Cancellation and timeout").
pub struct GroundStationTasks {
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GroundStationTasks {
    /// Broadcast the cancellation signal, then wait up to `grace` for every
    /// task to finish before returning. Tasks that do not finish in time are
    /// left to be dropped (and their serial handles closed) by the runtime.
    pub async fn shutdown(self, grace: Duration) {
        let _ = self.shutdown_tx.send(());
        let wait_all = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(grace, wait_all).await.is_err() {
            warn!("shutdown grace window elapsed with tasks still running");
        }
    }
}

/// The operator-facing facade (§6): one handle per axis, a shared sensor
/// reader, and the telemetry broadcaster. Holds no mutable state of its own
/// — every call either forwards to an axis's `mpsc` channel or reads a
/// `watch`/snapshot slot.
#[derive(Clone)]
pub struct GroundStation {
    axes: HashMap<AxisTag, AxisHandle>,
    bus: BusArbiter,
    sensors: Option<SensorReader>,
    telemetry: std::sync::Arc<TelemetryBroadcaster>,
}

impl GroundStation {
    fn handle(&self, tag: AxisTag) -> Result<&AxisHandle, OperatorError> {
        self.axes.get(&tag).ok_or(OperatorError::UnknownAxis(tag))
    }

    pub async fn move_to(&self, axis: AxisTag, angle_deg: f64, velocity_deg_s: f64) -> Result<(), OperatorError> {
        self.handle(axis)?.move_to(angle_deg, velocity_deg_s).await?;
        Ok(())
    }

    pub async fn jog(&self, axis: AxisTag, direction_forward: bool, speed_rpm: u16) -> Result<(), OperatorError> {
        self.handle(axis)?.jog(direction_forward, speed_rpm).await?;
        Ok(())
    }

    pub async fn stop(&self, axis: AxisTag) -> Result<(), OperatorError> {
        self.handle(axis)?.stop().await?;
        Ok(())
    }

    /// Emergency-stop every axis: three sequential priority transactions,
    /// one per axis, each jumping that axis's share of the bus FIFO (§5).
    pub async fn emergency_stop_all(&self) -> Result<(), OperatorError> {
        for tag in [AxisTag::Az, AxisTag::El, AxisTag::Cl] {
            if let Some(handle) = self.axes.get(&tag) {
                handle.emergency_stop().await?;
            }
        }
        Ok(())
    }

    pub async fn home(&self, axis: AxisTag) -> Result<(), OperatorError> {
        self.handle(axis)?.home().await?;
        Ok(())
    }

    pub async fn set_zero(&self, axis: AxisTag) -> Result<(), OperatorError> {
        self.handle(axis)?.set_zero().await?;
        Ok(())
    }

    pub async fn release_fault(&self, axis: AxisTag) -> Result<(), OperatorError> {
        self.handle(axis)?.release_fault().await?;
        Ok(())
    }

    /// Set the process-wide movement mode by sending a control message to
    /// every axis task (§9: "runtime changes route through a control
    /// message rather than mutating a shared variable").
    pub async fn set_movement_mode(&self, mode: MovementMode) -> Result<(), OperatorError> {
        for handle in self.axes.values() {
            handle.set_movement_mode(mode).await?;
        }
        Ok(())
    }

    pub fn subscribe_telemetry(&self) -> Subscription {
        self.telemetry.subscribe()
    }

    /// Send an explicit operator-requested IMU reconfiguration sequence
    /// (§4.4). Never called at open time; this is the only path that
    /// writes to the IMU port.
    pub async fn configure_imu(&self, body: Vec<u8>) -> Result<(), OperatorError> {
        self.sensors
            .as_ref()
            .ok_or(OperatorError::Sensor(error::SensorError::ImuNotConnected))?
            .configure_imu(body)
            .await
            .map_err(OperatorError::Sensor)
    }

    /// Diagnostic passthrough directly onto the bus, bypassing every axis
    /// controller (§6, "`raw_transact(addr, bytes)` for diagnostic
    /// tooling"). `bytes` is `[cmd, payload...]`; header, address framing,
    /// and checksum are still handled by the arbiter/codec. The response
    /// length is unknown for an arbitrary command, so this reads up to a
    /// generous bound rather than an exact count.
    pub async fn raw_transact(&self, addr: u8, bytes: Vec<u8>) -> Result<Vec<u8>, OperatorError> {
        let (cmd, payload) = bytes.split_first().unwrap_or((&0, &[]));
        self.bus
            .transact(
                addr,
                *cmd,
                payload.to_vec(),
                ResponseLen::UpTo(RAW_TRANSACT_MAX_RESPONSE),
                RAW_TRANSACT_TIMEOUT,
            )
            .await
            .map_err(|e| OperatorError::Axis(AxisError::Transport(e)))
    }
}

fn unix_ms_now() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Open the RS485 bus, spawn every configured axis, optionally spawn the
/// IMU/GNSS readers, and start the telemetry broadcaster's tick loop.
///
/// Returns the facade plus a handle the caller uses to drive shutdown.
pub async fn spawn(config: Config) -> anyhow::Result<(GroundStation, GroundStationTasks)> {
    let mut handles = Vec::new();

    let builder = tokio_serial::new(&config.bus.device_path, config.bus.baud)
        .timeout(Duration::from_millis(config.bus.default_timeout_ms));
    let port = tokio_serial::SerialStream::open(&builder)?;
    let gap = Duration::from_secs_f64(config.bus.effective_inter_frame_gap_ms() / 1000.0);
    let (bus, bus_handle) = BusArbiter::spawn(port, REQUEST_HEADER, gap);
    handles.push(bus_handle);
    info!(device = %config.bus.device_path, baud = config.bus.baud, "RS485 bus opened");

    let mut axes = HashMap::new();
    for axis_config in &config.axes {
        let (handle, task) = axis::spawn(axis_config.clone(), config.tracking.clone(), bus.clone());
        axes.insert(axis_config.tag, handle);
        handles.push(task);
    }

    let sensors = build_sensors(&config, &mut handles).await;

    let telemetry = TelemetryBroadcaster::new(config.telemetry.subscriber_buffer_depth);
    let (shutdown_tx, _) = broadcast::channel(1);

    let broadcaster = telemetry.clone();
    let tick_axes = axes.clone();
    let tick_sensors = sensors.clone();
    let telemetry_config = config.telemetry.clone();
    let telemetry_rate = config.telemetry.broadcast_rate_hz;
    let telemetry_shutdown = shutdown_tx.subscribe();
    let telemetry_task = tokio::spawn(async move {
        telemetry::run(broadcaster.clone(), telemetry_rate, telemetry_shutdown, move || {
            collect_snapshot(broadcaster.next_sequence(), &tick_axes, tick_sensors.as_ref(), &telemetry_config)
        })
        .await;
    });
    handles.push(telemetry_task);

    let station = GroundStation {
        axes,
        bus,
        sensors,
        telemetry,
    };
    let tasks = GroundStationTasks { handles, shutdown_tx };
    Ok((station, tasks))
}

/// Spawn whichever of the IMU/GNSS readers have a configured device path,
/// pushing their tasks onto `handles` so shutdown can await them, and
/// return a combined `SensorReader` if at least one came up. A reader with
/// no configured path (or that failed to lock onto a baud rate) is
/// represented by a `watch` channel that never updates, so callers still
/// see a consistent "forever stale" snapshot rather than a missing field.
async fn build_sensors(config: &Config, handles: &mut Vec<tokio::task::JoinHandle<()>>) -> Option<SensorReader> {
    let imu = match &config.sensors.imu_device_path {
        Some(path) => sensors::spawn_imu(path).await,
        None => None,
    };
    let gnss = match &config.sensors.gnss_device_path {
        Some(path) => sensors::spawn_gnss(path, 9600).await,
        None => None,
    };

    if imu.is_none() && gnss.is_none() {
        return None;
    }

    let (imu_rx, imu_commands) = match imu {
        Some((rx, cmd_tx, handle)) => {
            handles.push(handle);
            (rx, Some(cmd_tx))
        }
        None => (tokio::sync::watch::channel(sensors::imu::ImuSnapshot::default()).1, None),
    };
    let gnss_rx = match gnss {
        Some((rx, handle)) => {
            handles.push(handle);
            rx
        }
        None => tokio::sync::watch::channel(sensors::gnss::GnssSnapshot::default()).1,
    };

    Some(sensors::build_reader(imu_rx, imu_commands, gnss_rx, &config.sensors))
}

fn collect_snapshot(
    sequence: u64,
    axes: &HashMap<AxisTag, AxisHandle>,
    sensors: Option<&SensorReader>,
    telemetry_config: &config::TelemetryConfig,
) -> Snapshot {
    let axis_tuples: Vec<(AxisTag, axis::state::AxisObservation, Health)> = axes
        .iter()
        .map(|(tag, handle)| {
            let obs = handle.observe();
            let health = axis_health(&obs, telemetry_config.axis_unresponsive_s);
            (*tag, obs, health)
        })
        .collect();

    let (imu_heading_deg, gnss, imu_health, gnss_health) = match sensors {
        Some(reader) => {
            let (sensor_health, imu_health, gnss_health) = reader.health(telemetry_config.imu_stale_s, telemetry_config.gnss_stale_s);
            let _ = sensor_health;
            let fix = reader.latest_fix();
            (
                reader.heading_deg(),
                fix.map(|f| (f.lat_deg, f.lon_deg)),
                imu_health,
                gnss_health,
            )
        }
        None => (None, None, Health::Fault, Health::Fault),
    };

    compose_snapshot(sequence, unix_ms_now(), axis_tuples, imu_heading_deg, gnss, imu_health, gnss_health)
}
