//! Fault classification for an axis (§4.3.4).

use serde::{Deserialize, Serialize};

use crate::error::AxisError;

/// What drove an axis into `IDLE`. Recorded on the runtime state and
/// surfaced to telemetry until explicitly released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultKind {
    Timeout,
    Stalled,
    FollowingError,
    LimitTripped,
}

impl FaultKind {
    pub fn from_axis_error(err: &AxisError) -> Option<Self> {
        match err {
            AxisError::Transport(crate::error::TransportError::Timeout) => Some(FaultKind::Timeout),
            AxisError::Stalled => Some(FaultKind::Stalled),
            AxisError::FollowingError { .. } => Some(FaultKind::FollowingError),
            AxisError::LimitTripped => Some(FaultKind::LimitTripped),
            _ => None,
        }
    }
}
