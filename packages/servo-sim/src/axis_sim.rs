//! Per-axis simulated servo state: enough physical behavior (position
//! integration, stalls, limit trips, homing) to answer every opcode the
//! core's axis controller and homing strategies actually send
//! (`groundstation-core`'s `axis/mod.rs` and `axis/homing.rs`), with exact
//! response lengths matching `ACK_RESPONSE_LEN`/`STATUS_RESPONSE_LEN` there.

use servo_proto::status::{HomeStatus, IoBitmap, StatusBundle};
use servo_proto::{frame, numeric, Opcode};

use crate::config::SimAxisConfig;
use crate::scenarios::{ScenarioConfig, ScenarioType};

/// One-byte payload carried by every ACK-style response (§6: the core reads
/// a fixed 5-byte frame for everything except the status bundle).
const ACK_OK: u8 = 0x00;

/// Seek speed used while homing, in RPM.
const HOME_SEEK_RPM: i16 = -200;
/// Ticks a limit-switch home runs before reporting success, absent a stall
/// scenario forcing it to run until the stall threshold instead.
const HOME_SETTLE_TICKS: u32 = 20;

#[derive(Debug, Clone, Copy)]
enum Motion {
    Idle,
    Speed { rpm: i16 },
    ToTarget { target_pulses: i32 },
    Homing { ticks: u32 },
}

/// Simulated state for one servo, addressed over the bench bus the same way
/// a real driver would be.
pub struct SimAxis {
    pub addr: u8,
    microstep: u16,
    max_rpm: u16,
    angle_min_deg: f64,
    angle_max_deg: f64,
    pulses: f64,
    motion: Motion,
    enabled: bool,
    stalled: bool,
    limit_tripped: bool,
    home_status: HomeStatus,
    target_axis_tag: servo_proto::AxisTag,
}

impl SimAxis {
    pub fn new(config: &SimAxisConfig) -> Self {
        let pulses = numeric::angle_to_pulses(config.start_angle_deg, config.microstep) as f64;
        Self {
            addr: config.bus_address,
            microstep: config.microstep,
            max_rpm: config.max_rpm,
            angle_min_deg: config.angle_min_deg,
            angle_max_deg: config.angle_max_deg,
            pulses,
            motion: Motion::Idle,
            enabled: true,
            stalled: false,
            limit_tripped: false,
            home_status: HomeStatus::Success,
            target_axis_tag: config.tag,
        }
    }

    fn angle_deg(&self) -> f64 {
        numeric::pulses_to_angle(self.pulses as i32, self.microstep)
    }

    fn encoder_counts(&self) -> i64 {
        numeric::angle_to_counts(self.angle_deg())
    }

    /// Advance the simulated physics by `dt` seconds, applying whichever
    /// fault scenario targets this axis.
    pub fn tick(&mut self, dt: f64, scenarios: &ScenarioConfig) {
        if self.stalled {
            return;
        }

        let applies = scenarios.applies_to(self.target_axis_tag);
        let moving = !matches!(self.motion, Motion::Idle);

        match self.motion {
            Motion::Idle => {}
            Motion::Speed { rpm } => self.advance_by_rpm(rpm, dt),
            Motion::ToTarget { target_pulses } => {
                let remaining = target_pulses as f64 - self.pulses;
                let max_step = numeric::angle_to_pulses(
                    numeric::rpm_to_deg_s(self.max_rpm as f64) * dt,
                    self.microstep,
                )
                .unsigned_abs() as f64;
                if remaining.abs() <= max_step.max(1.0) {
                    self.pulses = target_pulses as f64;
                    self.motion = Motion::Idle;
                } else {
                    self.pulses += remaining.signum() * max_step;
                }
            }
            Motion::Homing { ticks } => {
                self.advance_by_rpm(HOME_SEEK_RPM, dt);
                if !(applies && scenarios.has(&ScenarioType::Stall)) {
                    self.motion = if ticks + 1 >= HOME_SETTLE_TICKS {
                        self.home_status = HomeStatus::Success;
                        Motion::Idle
                    } else {
                        Motion::Homing { ticks: ticks + 1 }
                    };
                }
            }
        }

        if applies && moving && scenarios.has(&ScenarioType::Stall) && self.angle_deg().abs() >= scenarios.stall_after_deg {
            self.stalled = true;
        }

        if applies && scenarios.has(&ScenarioType::LimitTrip)
            && (self.angle_deg() <= self.angle_min_deg || self.angle_deg() >= self.angle_max_deg)
        {
            self.limit_tripped = true;
        }
    }

    fn advance_by_rpm(&mut self, rpm: i16, dt: f64) {
        let deg_s = numeric::rpm_to_deg_s(rpm as f64);
        let delta_pulses = numeric::angle_to_pulses(deg_s * dt, self.microstep);
        self.pulses += delta_pulses as f64;
    }

    fn io_bitmap(&self) -> IoBitmap {
        let mut bits = 0u8;
        if self.limit_tripped {
            bits |= 0b0001;
        }
        IoBitmap(bits)
    }

    fn status_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(StatusBundle::PAYLOAD_LEN);
        payload.extend_from_slice(&numeric::encode_i48(self.encoder_counts()));
        let rpm = match self.motion {
            Motion::Speed { rpm } => rpm,
            Motion::Homing { .. } => HOME_SEEK_RPM,
            _ => 0,
        };
        payload.extend_from_slice(&numeric::encode_i16(rpm));
        payload.extend_from_slice(&numeric::encode_i32(self.pulses as i32));
        payload.push(self.io_bitmap().0);
        payload.extend_from_slice(&numeric::encode_i32(0)); // angle_error_counts: perfect tracking
        payload.push(self.enabled as u8);
        payload.push(self.stalled as u8);
        payload.push(match self.home_status {
            HomeStatus::InProgress => 0,
            HomeStatus::Success => 1,
            HomeStatus::Failed => 2,
        });
        payload.extend(std::iter::repeat(0u8).take(11));
        payload
    }

    /// Handle one decoded request, returning the response payload (the
    /// caller wraps it in the standard frame). `None` means "drop the
    /// request" — used by the `Timeout` scenario to simulate a dead driver.
    pub fn handle_request(&mut self, cmd: u8, payload: &[u8], scenarios: &ScenarioConfig) -> Option<Vec<u8>> {
        if scenarios.applies_to(self.target_axis_tag) && scenarios.has(&ScenarioType::Timeout) {
            return None;
        }

        let op = Opcode::try_from(cmd).ok()?;
        Some(match op {
            Opcode::StatusBundle => self.status_payload(),
            Opcode::HomeStatus => vec![match self.home_status {
                HomeStatus::InProgress => 0,
                HomeStatus::Success => 1,
                HomeStatus::Failed => 2,
            }],
            Opcode::SpeedMode => {
                if payload.len() >= 2 {
                    let word = u16::from_be_bytes([payload[0], payload[1]]);
                    let (rpm, reverse) = numeric::decode_speed_word(word);
                    let signed = if reverse { -(rpm as i16) } else { rpm as i16 };
                    self.motion = if signed == 0 { Motion::Idle } else { Motion::Speed { rpm: signed } };
                }
                vec![ACK_OK]
            }
            Opcode::AbsolutePulse => {
                if payload.len() >= 4 {
                    let target = numeric::decode_i32([payload[0], payload[1], payload[2], payload[3]]);
                    self.motion = Motion::ToTarget { target_pulses: target };
                }
                vec![ACK_OK]
            }
            Opcode::RelativePulse => {
                if payload.len() >= 4 {
                    let delta = numeric::decode_i32([payload[0], payload[1], payload[2], payload[3]]);
                    let target = self.pulses as i32 + delta;
                    self.motion = Motion::ToTarget { target_pulses: target };
                }
                vec![ACK_OK]
            }
            Opcode::SetZero => {
                self.pulses = 0.0;
                vec![ACK_OK]
            }
            Opcode::EmergencyStop => {
                self.motion = Motion::Idle;
                vec![ACK_OK]
            }
            Opcode::ExecuteHome => {
                self.home_status = HomeStatus::InProgress;
                self.stalled = false;
                self.motion = Motion::Homing { ticks: 0 };
                vec![ACK_OK]
            }
            Opcode::ReleaseLockedRotor => {
                self.stalled = false;
                self.motion = Motion::Idle;
                vec![ACK_OK]
            }
            _ => vec![ACK_OK],
        })
    }
}

/// Build a complete response frame for one request, or `None` if the
/// request should be dropped (silent timeout scenario).
pub fn build_response(addr: u8, cmd: u8, payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + payload.len() + 1);
    out.push(frame::REQUEST_HEADER);
    out.push(addr);
    out.push(cmd);
    out.extend(payload);
    let checksum = frame::checksum_of(&out);
    out.push(checksum);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_proto::AxisTag;

    fn axis() -> SimAxis {
        SimAxis::new(&SimAxisConfig {
            tag: AxisTag::Az,
            bus_address: 1,
            start_angle_deg: 0.0,
            microstep: 16,
            max_rpm: 3000,
            angle_min_deg: -270.0,
            angle_max_deg: 270.0,
        })
    }

    #[test]
    fn status_bundle_round_trips_through_the_codec() {
        let mut a = axis();
        let scenarios = ScenarioConfig::default();
        let payload = a.handle_request(Opcode::StatusBundle.as_u8(), &[], &scenarios).unwrap();
        let bundle = StatusBundle::decode(&payload).unwrap();
        assert_eq!(bundle.encoder_counts, 0);
        assert!(bundle.enabled);
        assert!(!bundle.stalled);
    }

    #[test]
    fn absolute_pulse_move_converges_on_target_over_ticks() {
        let mut a = axis();
        let scenarios = ScenarioConfig::default();
        let target = numeric::angle_to_pulses(90.0, 16);
        a.handle_request(
            Opcode::AbsolutePulse.as_u8(),
            &numeric::encode_i32(target),
            &scenarios,
        );
        for _ in 0..10_000 {
            a.tick(0.01, &scenarios);
        }
        assert!((a.angle_deg() - 90.0).abs() < 0.1);
    }

    #[test]
    fn stall_scenario_latches_once_threshold_is_crossed() {
        let mut a = axis();
        let mut scenarios = crate::scenarios::preset_stall(AxisTag::Az);
        scenarios.stall_after_deg = 5.0;
        a.handle_request(Opcode::SpeedMode.as_u8(), &numeric::encode_speed_word(500, false).to_be_bytes(), &scenarios);
        for _ in 0..1000 {
            a.tick(0.01, &scenarios);
        }
        let payload = a.handle_request(Opcode::StatusBundle.as_u8(), &[], &scenarios).unwrap();
        let bundle = StatusBundle::decode(&payload).unwrap();
        assert!(bundle.stalled);
    }

    #[test]
    fn timeout_scenario_drops_every_request() {
        let mut a = axis();
        let scenarios = crate::scenarios::preset_timeout(AxisTag::Az);
        assert!(a.handle_request(Opcode::StatusBundle.as_u8(), &[], &scenarios).is_none());
    }
}
