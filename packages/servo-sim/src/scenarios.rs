//! Fault-injection scenarios: the same toggleable-scenario pattern the
//! teacher's UWB simulator used for OCS/NLOS/dropout conditions, applied
//! here to the servo-bus fault kinds the axis controller must latch on
//! (`spec.md` §7): stalls, limit-switch trips, silent timeouts, and GNSS
//! fix dropout.

use serde::{Deserialize, Serialize};
use servo_proto::AxisTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioType {
    /// Axis reports `stalled = true` once it has moved past `stall_after_deg`.
    Stall,
    /// Axis reports its IN1 limit-switch bit set once it reaches its travel
    /// bound, even mid-motion.
    LimitTrip,
    /// Axis silently drops every request on the bus instead of responding,
    /// simulating a dead or disconnected driver.
    Timeout,
    /// GNSS stream stops emitting sentences after `gnss_dropout_after_s`.
    GnssDropout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub active: Vec<ScenarioType>,
    /// Which axis the `Stall`/`LimitTrip`/`Timeout` scenarios apply to.
    #[serde(default)]
    pub target_axis: Option<AxisTag>,
    #[serde(default = "default_stall_after_deg")]
    pub stall_after_deg: f64,
    #[serde(default = "default_gnss_dropout_after_s")]
    pub gnss_dropout_after_s: f64,
}

fn default_stall_after_deg() -> f64 {
    10.0
}

fn default_gnss_dropout_after_s() -> f64 {
    30.0
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            target_axis: None,
            stall_after_deg: default_stall_after_deg(),
            gnss_dropout_after_s: default_gnss_dropout_after_s(),
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, scenario: &ScenarioType) -> bool {
        self.active.contains(scenario)
    }

    pub fn applies_to(&self, tag: AxisTag) -> bool {
        self.target_axis.map_or(true, |t| t == tag)
    }
}

pub fn preset_stall(axis: AxisTag) -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::Stall],
        target_axis: Some(axis),
        ..ScenarioConfig::default()
    }
}

pub fn preset_limit_trip(axis: AxisTag) -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::LimitTrip],
        target_axis: Some(axis),
        ..ScenarioConfig::default()
    }
}

pub fn preset_timeout(axis: AxisTag) -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::Timeout],
        target_axis: Some(axis),
        ..ScenarioConfig::default()
    }
}

pub fn preset_gnss_dropout() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::GnssDropout],
        ..ScenarioConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scenario_has_nothing_active() {
        let sc = ScenarioConfig::default();
        assert!(!sc.has(&ScenarioType::Stall));
    }

    #[test]
    fn preset_targets_the_named_axis_only() {
        let sc = preset_stall(AxisTag::El);
        assert!(sc.has(&ScenarioType::Stall));
        assert!(sc.applies_to(AxisTag::El));
        assert!(!sc.applies_to(AxisTag::Az));
    }

    #[test]
    fn untargeted_scenario_applies_to_every_axis() {
        let sc = preset_gnss_dropout();
        assert!(sc.applies_to(AxisTag::Az));
        assert!(sc.applies_to(AxisTag::Cl));
    }
}
