//! Per-axis runtime state (§3, "Axis runtime state") and the hybrid
//! tracking state machine (§4.3.2).

use serde::{Deserialize, Serialize};

use crate::axis::fault::FaultKind;
use crate::config::MovementMode;

/// The four states of the hybrid speed/position tracking machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingState {
    TrackSpeed,
    Correcting,
    Hold,
    Idle,
}

/// Snapshot of one axis's observable state, published to telemetry via a
/// `watch` channel — the same latest-value discipline the sensor readers
/// use for IMU/GNSS state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisObservation {
    pub target_angle_deg: f64,
    pub target_velocity_deg_s: f64,
    pub commanded_rpm: i16,
    pub observed_angle_deg: f64,
    pub observed_rpm: i16,
    pub position_error_deg: f64,
    pub tracking_state: TrackingState,
    pub last_fault: Option<FaultKind>,
    pub last_response_age_s: f64,
}

impl Default for AxisObservation {
    fn default() -> Self {
        Self {
            target_angle_deg: 0.0,
            target_velocity_deg_s: 0.0,
            commanded_rpm: 0,
            observed_angle_deg: 0.0,
            observed_rpm: 0,
            position_error_deg: 0.0,
            tracking_state: TrackingState::Idle,
            last_fault: None,
            last_response_age_s: f64::INFINITY,
        }
    }
}

/// Everything the tick function needs that is not derived: the demand set
/// by the last operator command, plus the bookkeeping needed to decide
/// whether a new bus command is worth sending (§4.3.2, "minimize bus
/// traffic").
pub struct AxisRuntimeState {
    pub target_angle_deg: f64,
    pub target_velocity_deg_s: f64,
    pub observed_angle_deg: f64,
    pub observed_rpm: i16,
    pub tracking_state: TrackingState,
    pub tracking_enabled: bool,
    pub movement_mode: MovementMode,
    pub last_fault: Option<FaultKind>,
    pub last_commanded_state: Option<TrackingState>,
    pub last_commanded_rpm: Option<i16>,
    pub last_command_at: Option<tokio::time::Instant>,
    pub last_response_at: Option<tokio::time::Instant>,
}

impl Default for AxisRuntimeState {
    fn default() -> Self {
        Self {
            target_angle_deg: 0.0,
            target_velocity_deg_s: 0.0,
            observed_angle_deg: 0.0,
            observed_rpm: 0,
            tracking_state: TrackingState::Idle,
            tracking_enabled: false,
            movement_mode: MovementMode::default(),
            last_fault: None,
            last_commanded_state: None,
            last_commanded_rpm: None,
            last_command_at: None,
            last_response_at: None,
        }
    }
}

impl AxisRuntimeState {
    pub fn position_error_deg(&self) -> f64 {
        self.target_angle_deg - self.observed_angle_deg
    }

    pub fn to_observation(&self) -> AxisObservation {
        AxisObservation {
            target_angle_deg: self.target_angle_deg,
            target_velocity_deg_s: self.target_velocity_deg_s,
            commanded_rpm: self.last_commanded_rpm.unwrap_or(0),
            observed_angle_deg: self.observed_angle_deg,
            observed_rpm: self.observed_rpm,
            position_error_deg: self.position_error_deg(),
            tracking_state: self.tracking_state,
            last_fault: self.last_fault,
            last_response_age_s: self
                .last_response_at
                .map(|t| t.elapsed().as_secs_f64())
                .unwrap_or(f64::INFINITY),
        }
    }
}

/// Decision produced by one evaluation of the hybrid state machine: the
/// next tracking state plus the speed-mode RPM/direction to command, if
/// any command is warranted this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingDecision {
    pub state: TrackingState,
    pub rpm: i16,
    /// Absolute-position target in degrees, used only in `CORRECTING`.
    pub correcting_target_deg: f64,
}

/// Evaluate the four-state hybrid machine for one tick (§4.3.2).
///
/// `kp`, thresholds, hysteresis, and `max_rpm` come from `TrackingConfig`.
/// Hysteresis is applied around the `track`/`correcting` and
/// `correcting`/`hold` boundaries using the *previous* state, so a target
/// sitting exactly on a threshold does not flap every tick.
pub fn evaluate_hybrid(
    state: &AxisRuntimeState,
    kp: f64,
    track_threshold_deg: f64,
    hold_threshold_deg: f64,
    hysteresis_deg: f64,
    max_rpm: u16,
) -> TrackingDecision {
    if !state.tracking_enabled {
        return TrackingDecision {
            state: TrackingState::Idle,
            rpm: 0,
            correcting_target_deg: state.target_angle_deg,
        };
    }

    let error = state.position_error_deg();
    let abs_error = error.abs();
    let velocity = state.target_velocity_deg_s;
    let stationary = velocity.abs() < 1e-6;

    // Apply hysteresis relative to the previously commanded state so the
    // boundary itself moves depending on which side we are arriving from.
    let (track_hi, hold_hi) = match state.tracking_state {
        TrackingState::TrackSpeed => (track_threshold_deg - hysteresis_deg, hold_threshold_deg),
        TrackingState::Hold => (track_threshold_deg, hold_threshold_deg + hysteresis_deg),
        _ => (track_threshold_deg, hold_threshold_deg),
    };

    let next_state = if abs_error > track_hi || !stationary {
        TrackingState::TrackSpeed
    } else if abs_error < hold_hi {
        TrackingState::Hold
    } else {
        TrackingState::Correcting
    };

    let rpm = match next_state {
        TrackingState::TrackSpeed => {
            let feedforward_rpm = velocity * 60.0 / 360.0;
            let commanded = kp * error + feedforward_rpm;
            commanded.clamp(-(max_rpm as f64), max_rpm as f64).round() as i16
        }
        TrackingState::Hold => 0,
        TrackingState::Correcting | TrackingState::Idle => 0,
    };

    TrackingDecision {
        state: next_state,
        rpm,
        correcting_target_deg: state.target_angle_deg,
    }
}

/// Evaluate the `position` movement mode: always drive toward the target
/// angle with an absolute-position command, with no speed-mode tracking
/// phase. Used when the operator selects `position` instead of `hybrid`.
pub fn evaluate_position_mode(state: &AxisRuntimeState, hold_threshold_deg: f64) -> TrackingDecision {
    if !state.tracking_enabled {
        return TrackingDecision {
            state: TrackingState::Idle,
            rpm: 0,
            correcting_target_deg: state.target_angle_deg,
        };
    }
    let next_state = if state.position_error_deg().abs() < hold_threshold_deg {
        TrackingState::Hold
    } else {
        TrackingState::Correcting
    };
    TrackingDecision {
        state: next_state,
        rpm: 0,
        correcting_target_deg: state.target_angle_deg,
    }
}

/// Evaluate the `speed` movement mode: command RPM directly from the
/// target angular velocity, with no position feedback at all.
pub fn evaluate_speed_mode(state: &AxisRuntimeState, max_rpm: u16) -> TrackingDecision {
    if !state.tracking_enabled {
        return TrackingDecision {
            state: TrackingState::Idle,
            rpm: 0,
            correcting_target_deg: state.target_angle_deg,
        };
    }
    let rpm = (state.target_velocity_deg_s * 60.0 / 360.0)
        .clamp(-(max_rpm as f64), max_rpm as f64)
        .round() as i16;
    let next_state = if rpm == 0 { TrackingState::Hold } else { TrackingState::TrackSpeed };
    TrackingDecision {
        state: next_state,
        rpm,
        correcting_target_deg: state.target_angle_deg,
    }
}

/// Dispatch to the evaluator for `state.movement_mode` (§4.3.1).
pub fn evaluate(
    state: &AxisRuntimeState,
    kp: f64,
    track_threshold_deg: f64,
    hold_threshold_deg: f64,
    hysteresis_deg: f64,
    max_rpm: u16,
) -> TrackingDecision {
    match state.movement_mode {
        MovementMode::Hybrid => {
            evaluate_hybrid(state, kp, track_threshold_deg, hold_threshold_deg, hysteresis_deg, max_rpm)
        }
        MovementMode::Position => evaluate_position_mode(state, hold_threshold_deg),
        MovementMode::Speed => evaluate_speed_mode(state, max_rpm),
    }
}

/// Whether a new decision is worth sending to the bus (§4.3.2, condition
/// a/b/c): state changed, commanded speed drifted by more than 5 RPM, or
/// the last command is older than one tick period.
pub fn should_send_command(
    state: &AxisRuntimeState,
    decision: &TrackingDecision,
    tick_period: std::time::Duration,
) -> bool {
    let state_changed = state.last_commanded_state != Some(decision.state);
    let rpm_drifted = match state.last_commanded_rpm {
        Some(last) => (last as i32 - decision.rpm as i32).unsigned_abs() > 5,
        None => true,
    };
    let command_stale = match state.last_command_at {
        Some(at) => at.elapsed() >= tick_period,
        None => true,
    };
    state_changed || rpm_drifted || command_stale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_state() -> AxisRuntimeState {
        let mut s = AxisRuntimeState::default();
        s.tracking_enabled = true;
        s
    }

    #[test]
    fn large_error_enters_track_speed() {
        let mut s = base_state();
        s.target_angle_deg = 45.0;
        s.observed_angle_deg = 0.0;
        let d = evaluate_hybrid(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::TrackSpeed);
        assert!(d.rpm > 0);
    }

    #[test]
    fn mid_error_with_stationary_target_corrects() {
        let mut s = base_state();
        s.target_angle_deg = 1.0;
        s.observed_angle_deg = 0.0;
        let d = evaluate_hybrid(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::Correcting);
    }

    #[test]
    fn small_error_with_stationary_target_holds() {
        let mut s = base_state();
        s.target_angle_deg = 0.1;
        s.observed_angle_deg = 0.0;
        let d = evaluate_hybrid(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::Hold);
        assert_eq!(d.rpm, 0);
    }

    #[test]
    fn nonzero_velocity_forces_track_speed_even_near_target() {
        let mut s = base_state();
        s.target_angle_deg = 0.05;
        s.observed_angle_deg = 0.0;
        s.target_velocity_deg_s = 0.1;
        let d = evaluate_hybrid(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::TrackSpeed);
        let expected_rpm = (0.1 * 60.0 / 360.0).round() as i16;
        assert_eq!(d.rpm, expected_rpm);
    }

    #[test]
    fn disabled_tracking_is_idle_with_zero_rpm() {
        let mut s = base_state();
        s.tracking_enabled = false;
        s.target_angle_deg = 45.0;
        let d = evaluate_hybrid(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::Idle);
        assert_eq!(d.rpm, 0);
    }

    #[test]
    fn rpm_clamps_to_configured_max() {
        let mut s = base_state();
        s.target_angle_deg = 10_000.0;
        s.observed_angle_deg = 0.0;
        let d = evaluate_hybrid(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.rpm, 3000);
    }

    #[test]
    fn command_sent_when_state_changes() {
        let mut state = base_state();
        state.last_commanded_state = Some(TrackingState::Hold);
        state.last_commanded_rpm = Some(0);
        state.last_command_at = Some(tokio::time::Instant::now());
        let decision = TrackingDecision {
            state: TrackingState::TrackSpeed,
            rpm: 100,
            correcting_target_deg: 0.0,
        };
        assert!(should_send_command(&state, &decision, std::time::Duration::from_secs(10)));
    }

    #[test]
    fn command_suppressed_when_nothing_material_changed() {
        let mut state = base_state();
        state.last_commanded_state = Some(TrackingState::TrackSpeed);
        state.last_commanded_rpm = Some(100);
        state.last_command_at = Some(tokio::time::Instant::now());
        let decision = TrackingDecision {
            state: TrackingState::TrackSpeed,
            rpm: 102,
            correcting_target_deg: 0.0,
        };
        assert!(!should_send_command(&state, &decision, std::time::Duration::from_secs(10)));
    }

    #[test]
    fn position_mode_ignores_velocity_and_corrects_toward_target() {
        let mut s = base_state();
        s.movement_mode = MovementMode::Position;
        s.target_angle_deg = 45.0;
        s.target_velocity_deg_s = 10.0;
        let d = evaluate(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::Correcting);
        assert_eq!(d.correcting_target_deg, 45.0);
    }

    #[test]
    fn speed_mode_ignores_position_error_and_commands_velocity_directly() {
        let mut s = base_state();
        s.movement_mode = MovementMode::Speed;
        s.target_angle_deg = 45.0;
        s.target_velocity_deg_s = 36.0; // 6 RPM
        let d = evaluate(&s, 1.0, 2.0, 0.5, 0.1, 3000);
        assert_eq!(d.state, TrackingState::TrackSpeed);
        assert_eq!(d.rpm, 6);
    }
}
