//! Bench configuration: a TOML-deserialized simulated-axis list plus the
//! TCP endpoints standing in for the RS485/IMU/GNSS serial lines, in the
//! teacher's one-struct-per-concern style (`FullConfig`/`RaceConfig`).

use serde::Deserialize;
use servo_proto::AxisTag;

use crate::scenarios::ScenarioConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct SimAxisConfig {
    pub tag: AxisTag,
    pub bus_address: u8,
    #[serde(default)]
    pub start_angle_deg: f64,
    #[serde(default = "default_microstep")]
    pub microstep: u16,
    #[serde(default = "default_max_rpm")]
    pub max_rpm: u16,
    #[serde(default = "default_angle_min")]
    pub angle_min_deg: f64,
    #[serde(default = "default_angle_max")]
    pub angle_max_deg: f64,
}

fn default_microstep() -> u16 {
    16
}

fn default_max_rpm() -> u16 {
    3000
}

fn default_angle_min() -> f64 {
    -270.0
}

fn default_angle_max() -> f64 {
    270.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct BenchConfig {
    pub bus_listen_addr: String,
    #[serde(default)]
    pub imu_listen_addr: Option<String>,
    #[serde(default)]
    pub gnss_listen_addr: Option<String>,
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: f64,
    pub axes: Vec<SimAxisConfig>,
    #[serde(default)]
    pub scenarios: ScenarioConfig,
}

fn default_tick_rate_hz() -> f64 {
    100.0
}

impl BenchConfig {
    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_bench_config() {
        let raw = r#"
        bus_listen_addr = "127.0.0.1:7001"

        [[axes]]
        tag = "AZ"
        bus_address = 1
        start_angle_deg = 0.0

        [[axes]]
        tag = "EL"
        bus_address = 2
        start_angle_deg = 15.0
        "#;
        let cfg = BenchConfig::from_toml(raw).unwrap();
        assert_eq!(cfg.axes.len(), 2);
        assert_eq!(cfg.tick_rate_hz, 100.0);
        assert_eq!(cfg.axes[1].tag, AxisTag::El);
        assert_eq!(cfg.axes[1].microstep, 16);
    }
}
