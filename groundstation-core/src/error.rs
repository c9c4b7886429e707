//! Top-level error taxonomy (§7): every fallible operation this core
//! exposes surfaces one of these kinds, with the propagation policy
//! (retry, latch, advisory) left to callers per the kind.

use thiserror::Error;

use servo_proto::CodecError;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response within deadline")]
    Timeout,
    #[error("frame decode failed: {0}")]
    FrameError(#[from] CodecError),
    #[error("reply came from address {got}, expected {expected}")]
    AddressMismatch { expected: u8, got: u8 },
    #[error("local queue rejected the transaction")]
    BusBusy,
    #[error("underlying transport failed: {0}")]
    LinkDown(String),
}

#[derive(Debug, Error)]
pub enum AxisError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("servo rejected the command")]
    Protocol,
    #[error("target {target} outside envelope [{min}, {max}]")]
    OutOfRange { target: f64, min: f64, max: f64 },
    #[error("limit switch tripped during motion")]
    LimitTripped,
    #[error("following error {error_deg}° exceeds tolerance {tolerance_deg}°")]
    FollowingError { error_deg: f64, tolerance_deg: f64 },
    #[error("rotor stalled")]
    Stalled,
    #[error("homing timed out after {elapsed_s:.1}s")]
    HomingTimeout { elapsed_s: f64 },
    #[error("axis is in IDLE and requires release_fault before motion")]
    Idle,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown axis tag {0:?}")]
    UnknownAxis(String),
    #[error("unsupported baud rate {0}")]
    BadBaud(u32),
    #[error("min angle {min} is not less than max angle {max}")]
    BadEnvelope { min: f64, max: f64 },
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("no IMU frame received since open")]
    ImuAbsent,
    #[error("no GNSS fix in the last {stale_for_s:.1}s")]
    GnssStale { stale_for_s: f64 },
    #[error("IMU is not connected")]
    ImuNotConnected,
    #[error("IMU reader task has shut down")]
    ImuTaskGone,
    #[error("failed writing IMU configuration: {0}")]
    ImuIo(String),
}

/// Structured failure returned by every operator-facing `GroundStation`
/// method (§7, "every failed operator command returns a structured failure
/// with kind and message"). `kind` is the `Display` of the inner error;
/// wrapping it here just adds the one failure mode `AxisError` cannot
/// express on its own — the operator naming an axis tag that isn't wired up.
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("no axis configured for tag {0:?}")]
    UnknownAxis(servo_proto::AxisTag),
    #[error(transparent)]
    Axis(#[from] AxisError),
    #[error(transparent)]
    Sensor(#[from] SensorError),
}

/// System health, as rolled up per component and included in every
/// telemetry snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    Degraded,
    Fault,
}
