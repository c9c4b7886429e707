//! Startup configuration (§6, "Configuration surface"). Loaded from a TOML
//! file with a handful of deployment knobs overridable by environment
//! variable, following the teacher's `UwbHubConfig::default()` convention
//! of `std::env::var(..).ok().and_then(|v| v.parse().ok()).unwrap_or(..)`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use servo_proto::AxisTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HomeMethod {
    Limit,
    Stall,
}

/// Process-wide movement-mode selector (§4.3.1): the command family every
/// axis uses while tracking. `Hybrid` is this core's primary mode (see
/// DESIGN.md's resolution of the spec's open question on exposing it);
/// `Position`/`Speed` restrict the same tick function to one command family
/// instead of the four-state machine, for operators who want the simpler
/// behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementMode {
    Position,
    Speed,
    Hybrid,
}

impl Default for MovementMode {
    fn default() -> Self {
        MovementMode::Hybrid
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    pub tag: AxisTag,
    pub bus_address: u8,
    pub model_tag: String,
    pub has_limit_switches: bool,
    pub home_method: HomeMethod,
    pub working_current_ma: u16,
    pub home_current_ma: u16,
    pub angle_min_deg: f64,
    pub angle_max_deg: f64,
    pub warning_margin_deg: f64,
    pub following_error_tolerance_deg: f64,
    /// Degrees to back off from the stall point before calling it zero
    /// (stall homing only).
    #[serde(default = "default_backoff_deg")]
    pub stall_backoff_deg: f64,
    /// Overall homing timeout, in seconds (§4.3.3, default 120s).
    #[serde(default = "default_home_timeout_s")]
    pub home_timeout_s: f64,
}

fn default_backoff_deg() -> f64 {
    5.0
}

fn default_home_timeout_s() -> f64 {
    120.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub device_path: String,
    pub baud: u32,
    /// Minimum inter-frame gap in milliseconds (§4.2 invariant: ≥3.5 char
    /// times at the current baud, or 2ms, whichever is larger).
    pub inter_frame_gap_ms: f64,
    pub default_timeout_ms: u64,
}

impl BusConfig {
    /// 3.5 character times at this baud, in milliseconds, for an 8N1 frame
    /// (10 bits per character including start/stop).
    pub fn char_time_gap_ms(&self) -> f64 {
        let char_time_s = 10.0 / self.baud as f64;
        3.5 * char_time_s * 1000.0
    }

    pub fn effective_inter_frame_gap_ms(&self) -> f64 {
        self.inter_frame_gap_ms.max(self.char_time_gap_ms()).max(2.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub control_rate_hz: f64,
    pub kp: f64,
    pub track_threshold_deg: f64,
    pub hold_threshold_deg: f64,
    pub hysteresis_deg: f64,
    pub max_rpm: u16,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            control_rate_hz: 50.0,
            kp: 1.0,
            track_threshold_deg: 2.0,
            hold_threshold_deg: 0.5,
            hysteresis_deg: 0.1,
            max_rpm: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub broadcast_rate_hz: f64,
    pub subscriber_buffer_depth: usize,
    pub imu_stale_s: f64,
    pub axis_unresponsive_s: f64,
    pub gnss_stale_s: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            broadcast_rate_hz: 10.0,
            subscriber_buffer_depth: 16,
            imu_stale_s: 1.0,
            axis_unresponsive_s: 2.0,
            gnss_stale_s: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    pub imu_device_path: Option<String>,
    pub gnss_device_path: Option<String>,
    pub magnetic_declination_deg: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            imu_device_path: None,
            gnss_device_path: None,
            magnetic_declination_deg: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bus: BusConfig,
    pub axes: Vec<AxisConfig>,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
}

const VALID_BAUDS: [u32; 7] = [9600, 19200, 25000, 38400, 57600, 115200, 256000];

impl Config {
    /// Parse from a TOML string and validate the §7 `Configuration` class
    /// of startup errors (fatal — the core refuses to start).
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Environment overrides for the handful of deployment knobs (serial
    /// device paths), mirroring the teacher's env-override convention.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("GROUNDSTATION_BUS_DEVICE") {
            self.bus.device_path = path;
        }
        if let Ok(path) = std::env::var("GROUNDSTATION_IMU_DEVICE") {
            self.sensors.imu_device_path = Some(path);
        }
        if let Ok(path) = std::env::var("GROUNDSTATION_GNSS_DEVICE") {
            self.sensors.gnss_device_path = Some(path);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !VALID_BAUDS.contains(&self.bus.baud) {
            return Err(ConfigError::BadBaud(self.bus.baud));
        }
        for axis in &self.axes {
            if !(axis.angle_min_deg < axis.angle_max_deg) {
                return Err(ConfigError::BadEnvelope {
                    min: axis.angle_min_deg,
                    max: axis.angle_max_deg,
                });
            }
        }
        Ok(())
    }

    pub fn axis(&self, tag: AxisTag) -> Option<&AxisConfig> {
        self.axes.iter().find(|a| a.tag == tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
        [bus]
        device_path = "/dev/ttyUSB0"
        baud = 38400
        inter_frame_gap_ms = 2.0
        default_timeout_ms = 200

        [[axes]]
        tag = "AZ"
        bus_address = 1
        model_tag = "57D"
        has_limit_switches = true
        home_method = "limit"
        working_current_ma = 2000
        home_current_ma = 1000
        angle_min_deg = -270.0
        angle_max_deg = 270.0
        warning_margin_deg = 10.0
        following_error_tolerance_deg = 8.8

        [[axes]]
        tag = "EL"
        bus_address = 2
        model_tag = "42D"
        has_limit_switches = false
        home_method = "stall"
        working_current_ma = 1500
        home_current_ma = 800
        angle_min_deg = 0.0
        angle_max_deg = 90.0
        warning_margin_deg = 5.0
        following_error_tolerance_deg = 11.0
        "#
    }

    #[test]
    fn parses_minimal_config() {
        let config = Config::from_toml(sample_toml()).unwrap();
        assert_eq!(config.axes.len(), 2);
        assert_eq!(config.tracking.control_rate_hz, 50.0);
        assert_eq!(config.telemetry.broadcast_rate_hz, 10.0);
        let el = config.axis(AxisTag::El).unwrap();
        assert_eq!(el.home_method, HomeMethod::Stall);
    }

    #[test]
    fn rejects_unsupported_baud() {
        let toml = sample_toml().replace("baud = 38400", "baud = 12345");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::BadBaud(12345)));
    }

    #[test]
    fn rejects_inverted_envelope() {
        let toml = sample_toml().replace("angle_max_deg = 270.0", "angle_max_deg = -300.0");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(matches!(err, ConfigError::BadEnvelope { .. }));
    }

    #[test]
    fn inter_frame_gap_uses_character_time_at_low_baud() {
        let bus = BusConfig {
            device_path: "/dev/null".into(),
            baud: 9600,
            inter_frame_gap_ms: 2.0,
            default_timeout_ms: 200,
        };
        // 3.5 char times at 9600 baud ≈ 3.6ms, which exceeds the 2ms floor.
        assert!(bus.effective_inter_frame_gap_ms() > 3.0);
    }
}
