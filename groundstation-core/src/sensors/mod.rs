//! Sensor Reader (§4.4): background collection of IMU and GNSS state,
//! exposed as latest-value snapshots. One task per serial handle, per the
//! shared-resource policy (§5) — nothing outside this module ever touches
//! the IMU or GNSS port directly.

pub mod compass;
pub mod gnss;
pub mod imu;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::config::SensorConfig;
use crate::error::{Health, SensorError};
use gnss::GnssSnapshot;
use imu::{ImuCommand, ImuPacket, ImuSnapshot};

const IMU_BAUD_CANDIDATES: [u32; 2] = [9600, 115200];
const IMU_PROBE_WINDOW: Duration = Duration::from_secs(1);

/// Health summary for the sensor subsystem (§4.4's `health()` operation).
#[derive(Debug, Clone, Copy)]
pub struct SensorHealth {
    pub imu_rate_hz: f64,
    pub gnss_has_recent_fix: bool,
    pub last_imu_packet_age_s: f64,
}

/// Handle exposing the latest IMU/GNSS state to any reader (Axis
/// Controllers do not use this; only the Telemetry Broadcaster and
/// operator diagnostics do).
#[derive(Clone)]
pub struct SensorReader {
    imu: watch::Receiver<ImuSnapshot>,
    gnss: watch::Receiver<GnssSnapshot>,
    imu_commands: Option<mpsc::Sender<ImuCommand>>,
    declination_deg: f64,
}

impl SensorReader {
    pub fn latest_imu(&self) -> ImuSnapshot {
        self.imu.borrow().clone()
    }

    pub fn latest_fix(&self) -> Option<gnss::Fix> {
        self.gnss.borrow().fix
    }

    /// Tilt-compensated compass heading, if both magnetometer and Euler
    /// angle packets are fresh enough to be meaningful.
    pub fn heading_deg(&self) -> Option<f64> {
        let snap = self.imu.borrow();
        let (mag, _) = snap.magnetometer?;
        let (euler, _) = snap.euler?;
        let ImuPacket::Magnetometer { x_raw, y_raw, z_raw, .. } = mag else { return None };
        let ImuPacket::Euler { roll_deg, pitch_deg, .. } = euler else { return None };
        Some(compass::heading_deg(
            x_raw as f64,
            y_raw as f64,
            z_raw as f64,
            pitch_deg as f64,
            roll_deg as f64,
            self.declination_deg,
        ))
    }

    pub fn health(&self, imu_stale_s: f64, gnss_stale_s: f64) -> (SensorHealth, Health, Health) {
        let imu_age = self.imu.borrow().freshest_age_s();
        // §4.4: stale if no valid GGA has arrived within `gnss_stale_s`, even
        // if an earlier fix is still sitting in the snapshot.
        let (gnss_stale, gnss_has_fix) = {
            let snap = self.gnss.borrow();
            (snap.no_fix_for(gnss_stale_s), snap.fix.is_some())
        };

        let imu_health = if imu_age.is_infinite() {
            Health::Fault
        } else if imu_age > imu_stale_s {
            Health::Degraded
        } else {
            Health::Ok
        };

        let gnss_health = if gnss_stale {
            Health::Degraded
        } else {
            Health::Ok
        };

        (
            SensorHealth {
                imu_rate_hz: if imu_age > 0.0 { 1.0 / imu_age } else { 0.0 },
                gnss_has_recent_fix: gnss_has_fix && !gnss_stale,
                last_imu_packet_age_s: imu_age,
            },
            imu_health,
            gnss_health,
        )
    }

    /// Send an operator-requested IMU configuration sequence (§4.4): the
    /// only path that ever writes to the IMU port, bracketed by the
    /// firmware's unlock/lock sequence inside the reader task itself so it
    /// never races the streaming read loop.
    pub async fn configure_imu(&self, body: Vec<u8>) -> Result<(), SensorError> {
        let tx = self.imu_commands.as_ref().ok_or(SensorError::ImuNotConnected)?;
        let (reply, reply_rx) = oneshot::channel();
        tx.send(ImuCommand::Configure { body, reply }).await.map_err(|_| SensorError::ImuTaskGone)?;
        reply_rx.await.map_err(|_| SensorError::ImuTaskGone)?.map_err(|e| SensorError::ImuIo(e.to_string()))
    }
}

/// Open the IMU port, auto-detect its baud rate by probing each candidate
/// in turn, then spawn the reader task. Returns `None` if no candidate baud
/// produced a valid frame within the probe window.
pub async fn spawn_imu(
    device_path: &str,
) -> Option<(watch::Receiver<ImuSnapshot>, mpsc::Sender<ImuCommand>, tokio::task::JoinHandle<()>)> {
    for &baud in &IMU_BAUD_CANDIDATES {
        let builder = tokio_serial::new(device_path, baud).timeout(Duration::from_millis(50));
        let mut port = match tokio_serial::SerialStream::open(&builder) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("failed to open IMU port {device_path} at {baud} baud: {e}");
                continue;
            }
        };

        if imu::probe_baud(&mut port, IMU_PROBE_WINDOW).await {
            info!("IMU locked at {baud} baud on {device_path}");
            let (tx, rx) = watch::channel(ImuSnapshot::default());
            let (cmd_tx, cmd_rx) = mpsc::channel(4);
            let handle = tokio::spawn(imu::run(port, tx, cmd_rx));
            return Some((rx, cmd_tx, handle));
        }
    }
    None
}

pub async fn spawn_gnss(
    device_path: &str,
    baud: u32,
) -> Option<(watch::Receiver<GnssSnapshot>, tokio::task::JoinHandle<()>)> {
    let builder = tokio_serial::new(device_path, baud).timeout(Duration::from_millis(50));
    let port = match tokio_serial::SerialStream::open(&builder) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("failed to open GNSS port {device_path}: {e}");
            return None;
        }
    };
    let (tx, rx) = watch::channel(GnssSnapshot::default());
    let handle = tokio::spawn(gnss::run(port, tx));
    Some((rx, handle))
}

pub fn build_reader(
    imu: watch::Receiver<ImuSnapshot>,
    imu_commands: Option<mpsc::Sender<ImuCommand>>,
    gnss: watch::Receiver<GnssSnapshot>,
    config: &SensorConfig,
) -> SensorReader {
    SensorReader {
        imu,
        gnss,
        imu_commands,
        declination_deg: config.magnetic_declination_deg,
    }
}
