//! Axis Controller (§4.3): per-axis tick task owning its runtime state,
//! driven by an `mpsc` command channel and publishing observations over a
//! `watch` channel — no shared mutex, per the "per-task ownership +
//! snapshots" design note (§9).

pub mod fault;
pub mod homing;
pub mod state;

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::bus::{BusArbiter, ResponseLen};
use crate::config::{AxisConfig, HomeMethod, MovementMode, TrackingConfig};
use crate::error::{AxisError, TransportError};
use fault::FaultKind;
use servo_proto::status::StatusBundle;
use servo_proto::{numeric, AxisTag, Opcode};
use state::{evaluate, should_send_command, AxisObservation, AxisRuntimeState, TrackingState};

const STATUS_RESPONSE_LEN: usize = 3 + StatusBundle::PAYLOAD_LEN + 1;
const ACK_RESPONSE_LEN: usize = 5;
const MAX_QUERY_RETRIES: u32 = 3;

/// Operator-facing command, delivered over the axis's `mpsc` channel.
/// Each carries a `oneshot` so the caller can await the outcome.
pub enum AxisCommand {
    MoveTo {
        angle_deg: f64,
        velocity_deg_s: f64,
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    Jog {
        direction_forward: bool,
        speed_rpm: u16,
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    EmergencyStop {
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    Home {
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    SetZero {
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    ReleaseFault {
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
    SetMovementMode {
        mode: MovementMode,
        reply: oneshot::Sender<Result<(), AxisError>>,
    },
}

/// Handle held by callers (the `GroundStation` facade, the HTTP layer
/// upstream of this crate) to drive one axis.
#[derive(Clone)]
pub struct AxisHandle {
    tag: AxisTag,
    tx: mpsc::Sender<AxisCommand>,
    observation: watch::Receiver<AxisObservation>,
}

impl AxisHandle {
    pub fn tag(&self) -> AxisTag {
        self.tag
    }

    pub fn observe(&self) -> AxisObservation {
        self.observation.borrow().clone()
    }

    pub async fn move_to(&self, angle_deg: f64, velocity_deg_s: f64) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::MoveTo {
            angle_deg,
            velocity_deg_s,
            reply,
        })
        .await
    }

    pub async fn jog(&self, direction_forward: bool, speed_rpm: u16) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::Jog {
            direction_forward,
            speed_rpm,
            reply,
        })
        .await
    }

    pub async fn stop(&self) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::Stop { reply }).await
    }

    pub async fn emergency_stop(&self) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::EmergencyStop { reply }).await
    }

    pub async fn home(&self) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::Home { reply }).await
    }

    pub async fn set_zero(&self) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::SetZero { reply }).await
    }

    pub async fn release_fault(&self) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::ReleaseFault { reply }).await
    }

    pub async fn set_movement_mode(&self, mode: MovementMode) -> Result<(), AxisError> {
        self.call(|reply| AxisCommand::SetMovementMode { mode, reply }).await
    }

    async fn call<F>(&self, build: F) -> Result<(), AxisError>
    where
        F: FnOnce(oneshot::Sender<Result<(), AxisError>>) -> AxisCommand,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| AxisError::Transport(TransportError::LinkDown("axis task has shut down".into())))?;
        reply_rx
            .await
            .map_err(|_| AxisError::Transport(TransportError::LinkDown("axis task dropped the reply".into())))?
    }
}

/// Spawn the per-axis tick task. Returns a handle plus the task's
/// `JoinHandle` (awaited at shutdown).
pub fn spawn(
    config: AxisConfig,
    tracking: TrackingConfig,
    bus: BusArbiter,
) -> (AxisHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(32);
    let (obs_tx, obs_rx) = watch::channel(AxisObservation::default());
    let tag = config.tag;
    let handle = tokio::spawn(run(config, tracking, bus, rx, obs_tx));
    (
        AxisHandle {
            tag,
            tx,
            observation: obs_rx,
        },
        handle,
    )
}

/// Current microstep setting assumed for pulse-based moves. The all-
/// parameters bundle is read once at startup in a full implementation; for
/// tick-loop purposes we treat it as fixed configuration here since none of
/// this core's operations change microstep at runtime.
const ASSUMED_MICROSTEP: u16 = 16;

async fn run(
    config: AxisConfig,
    tracking: TrackingConfig,
    bus: BusArbiter,
    mut commands: mpsc::Receiver<AxisCommand>,
    observation: watch::Sender<AxisObservation>,
) {
    let addr = config.bus_address;
    let tick_period = Duration::from_secs_f64(1.0 / tracking.control_rate_hz);
    let mut interval = tokio::time::interval(tick_period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut state = AxisRuntimeState::default();
    let mut homing_in_progress = false;

    info!(axis = %config.tag, addr, "axis controller started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if !homing_in_progress {
                    tick(&config, &tracking, &bus, &mut state, tick_period).await;
                }
                let _ = observation.send(state.to_observation());
            }
            maybe_cmd = commands.recv() => {
                match maybe_cmd {
                    Some(cmd) => {
                        handle_command(&config, &bus, &mut state, &mut homing_in_progress, cmd).await;
                        let _ = observation.send(state.to_observation());
                    }
                    None => {
                        info!(axis = %config.tag, "command channel closed, axis task exiting");
                        return;
                    }
                }
            }
        }
    }
}

async fn handle_command(
    config: &AxisConfig,
    bus: &BusArbiter,
    state: &mut AxisRuntimeState,
    homing_in_progress: &mut bool,
    cmd: AxisCommand,
) {
    match cmd {
        AxisCommand::MoveTo { angle_deg, velocity_deg_s, reply } => {
            let result = if state.last_fault.is_some() {
                Err(AxisError::Idle)
            } else if angle_deg < config.angle_min_deg || angle_deg > config.angle_max_deg {
                Err(AxisError::OutOfRange {
                    target: angle_deg,
                    min: config.angle_min_deg,
                    max: config.angle_max_deg,
                })
            } else {
                state.target_angle_deg = angle_deg;
                state.target_velocity_deg_s = velocity_deg_s;
                state.tracking_enabled = true;
                Ok(())
            };
            let _ = reply.send(result);
        }
        AxisCommand::Jog { direction_forward, speed_rpm, reply } => {
            let result = issue_speed_command(bus, config.bus_address, speed_rpm, !direction_forward).await;
            if result.is_ok() {
                state.tracking_enabled = false;
            }
            let _ = reply.send(result.map_err(AxisError::Transport));
        }
        AxisCommand::Stop { reply } => {
            let result = issue_speed_command(bus, config.bus_address, 0, false).await;
            state.tracking_enabled = false;
            let _ = reply.send(result.map_err(AxisError::Transport));
        }
        AxisCommand::EmergencyStop { reply } => {
            let result = issue_emergency_stop(bus, config.bus_address).await;
            state.tracking_enabled = false;
            state.tracking_state = TrackingState::Idle;
            let _ = reply.send(result.map_err(AxisError::Transport));
        }
        AxisCommand::Home { reply } => {
            *homing_in_progress = true;
            state.tracking_enabled = false;
            let timeout = Duration::from_secs_f64(config.home_timeout_s);
            let result = match config.home_method {
                HomeMethod::Limit => homing::home_limit_switch(bus, config.bus_address, timeout).await,
                HomeMethod::Stall => {
                    homing::home_stall(bus, config.bus_address, config.stall_backoff_deg, ASSUMED_MICROSTEP, timeout)
                        .await
                }
            };
            if result.is_ok() {
                state.observed_angle_deg = 0.0;
                state.last_fault = None;
            }
            *homing_in_progress = false;
            let _ = reply.send(result);
        }
        AxisCommand::SetZero { reply } => {
            let result = bus
                .transact(config.bus_address, Opcode::SetZero.as_u8(), vec![], ResponseLen::Exact(ACK_RESPONSE_LEN), Duration::from_millis(200))
                .await
                .map(|_| ())
                .map_err(AxisError::Transport);
            if result.is_ok() {
                state.observed_angle_deg = 0.0;
            }
            let _ = reply.send(result);
        }
        AxisCommand::ReleaseFault { reply } => {
            state.last_fault = None;
            state.tracking_state = TrackingState::Idle;
            let _ = reply.send(Ok(()));
        }
        AxisCommand::SetMovementMode { mode, reply } => {
            info!(axis = %config.tag, ?mode, "movement mode changed");
            state.movement_mode = mode;
            let _ = reply.send(Ok(()));
        }
    }
}

async fn tick(
    config: &AxisConfig,
    tracking: &TrackingConfig,
    bus: &BusArbiter,
    state: &mut AxisRuntimeState,
    tick_period: Duration,
) {
    match refresh_observed(bus, config.bus_address, state).await {
        Ok(bundle) => {
            if bundle.io.in1() && state.tracking_state != TrackingState::Idle {
                warn!(axis = %config.tag, "limit switch tripped during motion");
                fault_latch(state, FaultKind::LimitTripped, bus, config.bus_address).await;
                return;
            }
            if bundle.stalled && state.tracking_state != TrackingState::Idle {
                warn!(axis = %config.tag, "stall flag set outside homing");
                fault_latch(state, FaultKind::Stalled, bus, config.bus_address).await;
                return;
            }
        }
        Err(_) => {
            warn!(axis = %config.tag, "status query exhausted retries, latching fault");
            fault_latch(state, FaultKind::Timeout, bus, config.bus_address).await;
            return;
        }
    }

    let error_deg = state.position_error_deg();
    if error_deg.abs() > config.following_error_tolerance_deg {
        warn!(axis = %config.tag, error_deg, "following error exceeded tolerance");
        fault_latch(state, FaultKind::FollowingError, bus, config.bus_address).await;
        return;
    }

    if state.last_fault.is_some() {
        return;
    }

    let mut decision = evaluate(
        state,
        tracking.kp,
        tracking.track_threshold_deg,
        tracking.hold_threshold_deg,
        tracking.hysteresis_deg,
        tracking.max_rpm,
    );

    // Cap commanded RPM near the warning margin (§4.3.5).
    let margin_hit = state.observed_angle_deg <= config.angle_min_deg + config.warning_margin_deg
        || state.observed_angle_deg >= config.angle_max_deg - config.warning_margin_deg;
    if margin_hit {
        let safe_cap = (tracking.max_rpm / 4).max(1);
        decision.rpm = decision.rpm.clamp(-(safe_cap as i16), safe_cap as i16);
    }

    if !should_send_command(state, &decision, tick_period) {
        state.tracking_state = decision.state;
        return;
    }

    let send_result = match decision.state {
        TrackingState::TrackSpeed => {
            issue_speed_command(bus, config.bus_address, decision.rpm.unsigned_abs(), decision.rpm < 0).await
        }
        TrackingState::Correcting => {
            issue_absolute_move(bus, config.bus_address, decision.correcting_target_deg, ASSUMED_MICROSTEP).await
        }
        TrackingState::Hold => issue_speed_command(bus, config.bus_address, 0, false).await,
        TrackingState::Idle => issue_emergency_stop(bus, config.bus_address).await,
    };

    match send_result {
        Ok(()) => {
            state.tracking_state = decision.state;
            state.last_commanded_state = Some(decision.state);
            state.last_commanded_rpm = Some(decision.rpm);
            state.last_command_at = Some(tokio::time::Instant::now());
        }
        Err(_) => {
            fault_latch(state, FaultKind::Timeout, bus, config.bus_address).await;
        }
    }
}

async fn fault_latch(state: &mut AxisRuntimeState, kind: FaultKind, bus: &BusArbiter, addr: u8) {
    state.tracking_enabled = false;
    state.tracking_state = TrackingState::Idle;
    state.last_fault = Some(kind);
    let _ = issue_emergency_stop(bus, addr).await;
}

/// Re-query the status bundle to refresh observed angle/RPM, retrying
/// idempotent queries up to N=3 times (§7 propagation policy).
async fn refresh_observed(
    bus: &BusArbiter,
    addr: u8,
    state: &mut AxisRuntimeState,
) -> Result<StatusBundle, TransportError> {
    let mut last_err = TransportError::Timeout;
    for attempt in 0..MAX_QUERY_RETRIES {
        let result = bus
            .transact(
                addr,
                Opcode::StatusBundle.as_u8(),
                vec![],
                ResponseLen::Exact(STATUS_RESPONSE_LEN),
                Duration::from_millis(200),
            )
            .await;
        match result {
            Ok(payload) => {
                return match StatusBundle::decode(&payload) {
                    Ok(bundle) => {
                        state.observed_angle_deg = numeric::counts_to_angle(bundle.encoder_counts);
                        state.observed_rpm = bundle.rpm;
                        state.last_response_at = Some(tokio::time::Instant::now());
                        Ok(bundle)
                    }
                    Err(e) => Err(TransportError::FrameError(e)),
                };
            }
            Err(e) => {
                last_err = e;
                if attempt + 1 < MAX_QUERY_RETRIES {
                    continue;
                }
            }
        }
    }
    Err(last_err)
}

async fn issue_speed_command(bus: &BusArbiter, addr: u8, rpm: u16, reverse: bool) -> Result<(), TransportError> {
    let word = numeric::encode_speed_word(rpm, reverse);
    let payload = word.to_be_bytes().to_vec();
    bus.transact(addr, Opcode::SpeedMode.as_u8(), payload, ResponseLen::Exact(ACK_RESPONSE_LEN), Duration::from_millis(200))
        .await
        .map(|_| ())
}

async fn issue_absolute_move(bus: &BusArbiter, addr: u8, target_deg: f64, microstep: u16) -> Result<(), TransportError> {
    let pulses = numeric::angle_to_pulses(target_deg, microstep);
    let payload = numeric::encode_i32(pulses).to_vec();
    bus.transact(addr, Opcode::AbsolutePulse.as_u8(), payload, ResponseLen::Exact(ACK_RESPONSE_LEN), Duration::from_millis(200))
        .await
        .map(|_| ())
}

async fn issue_emergency_stop(bus: &BusArbiter, addr: u8) -> Result<(), TransportError> {
    bus.transact_priority(addr, Opcode::EmergencyStop.as_u8(), vec![], ResponseLen::Exact(ACK_RESPONSE_LEN), Duration::from_millis(200))
        .await
        .map(|_| ())
        .or_else(|e| {
            error!("emergency stop transaction failed: {e}");
            Err(e)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HomeMethod;
    use servo_proto::frame::{checksum_of, REQUEST_HEADER};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_config() -> AxisConfig {
        AxisConfig {
            tag: AxisTag::Az,
            bus_address: 1,
            model_tag: "57D".into(),
            has_limit_switches: true,
            home_method: HomeMethod::Limit,
            working_current_ma: 2000,
            home_current_ma: 1000,
            angle_min_deg: -270.0,
            angle_max_deg: 270.0,
            warning_margin_deg: 5.0,
            following_error_tolerance_deg: 8.8,
            stall_backoff_deg: 5.0,
            home_timeout_s: 120.0,
        }
    }

    async fn idle_status_servo(mut half: tokio::io::DuplexStream, addr: u8) {
        let mut buf = [0u8; 64];
        loop {
            let n = match half.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let req = &buf[..n];
            let cmd = req[2];
            let mut resp = vec![REQUEST_HEADER, addr, cmd];
            if cmd == Opcode::StatusBundle.as_u8() {
                resp.extend(std::iter::repeat(0u8).take(StatusBundle::PAYLOAD_LEN));
            } else {
                resp.push(0);
            }
            let sum = checksum_of(&resp);
            resp.push(sum);
            if half.write_all(&resp).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn move_to_out_of_envelope_is_rejected_without_bus_traffic() {
        let (core_side, sim_side) = tokio::io::duplex(256);
        tokio::spawn(idle_status_servo(sim_side, 1));
        let (bus, _bus_handle) = BusArbiter::spawn(core_side, REQUEST_HEADER, Duration::from_millis(2));
        let (handle, _task) = spawn(test_config(), TrackingConfig::default(), bus);

        let err = handle.move_to(999.0, 0.0).await.unwrap_err();
        assert!(matches!(err, AxisError::OutOfRange { .. }));
    }

    #[tokio::test]
    async fn move_within_envelope_is_accepted() {
        let (core_side, sim_side) = tokio::io::duplex(256);
        tokio::spawn(idle_status_servo(sim_side, 1));
        let (bus, _bus_handle) = BusArbiter::spawn(core_side, REQUEST_HEADER, Duration::from_millis(2));
        let (handle, _task) = spawn(test_config(), TrackingConfig::default(), bus);

        handle.move_to(45.0, 0.0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let obs = handle.observe();
        assert_eq!(obs.target_angle_deg, 45.0);
    }
}
