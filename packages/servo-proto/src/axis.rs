//! Axis identity — stable tag ↔ bus address mapping, fixed at construction.

use serde::{Deserialize, Serialize};

/// One of the three independently controlled rotational degrees of freedom.
///
/// The tag↔address mapping is decided once, at `Config` load time, and is
/// immutable for the process lifetime (`spec.md` §3, Axis identity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AxisTag {
    Az,
    El,
    Cl,
}

impl AxisTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            AxisTag::Az => "AZ",
            AxisTag::El => "EL",
            AxisTag::Cl => "CL",
        }
    }

    /// Conventional bus address for this axis (1, 2, 3) when not overridden
    /// by configuration.
    pub fn default_address(&self) -> u8 {
        match self {
            AxisTag::Az => 1,
            AxisTag::El => 2,
            AxisTag::Cl => 3,
        }
    }
}

impl std::fmt::Display for AxisTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
