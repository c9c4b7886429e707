//! Bulk status/parameter bundles and the small enums that back individual
//! query responses (`spec.md` §6, "Bulk queries" and "Configuration reads").
//!
//! Byte offsets for [`StatusBundle`] and [`AllParametersBundle`] are not
//! given explicitly by the source documentation available to this crate;
//! the layouts below were chosen to satisfy the documented field list and
//! total frame length for each bundle and are treated as this core's
//! canonical wire layout (see `DESIGN.md`).

use crate::error::CodecError;
use crate::numeric::{decode_i16, decode_i32, decode_i48, decode_microstep};

/// Digital I/O snapshot: bit0=IN1, bit1=IN2, bit2=OUT1, bit3=OUT2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoBitmap(pub u8);

impl IoBitmap {
    pub fn in1(&self) -> bool {
        self.0 & 0b0001 != 0
    }
    pub fn in2(&self) -> bool {
        self.0 & 0b0010 != 0
    }
    pub fn out1(&self) -> bool {
        self.0 & 0b0100 != 0
    }
    pub fn out2(&self) -> bool {
        self.0 & 0b1000 != 0
    }
}

/// Outcome of the most recent homing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomeStatus {
    InProgress,
    Success,
    Failed,
}

impl TryFrom<u8> for HomeStatus {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HomeStatus::InProgress),
            1 => Ok(HomeStatus::Success),
            2 => Ok(HomeStatus::Failed),
            other => Err(CodecError::BadEnumValue { field: "home_status", value: other }),
        }
    }
}

/// Closed-loop / open-loop / FOC mode, crossed with pulse (SR) vs serial (CR)
/// command source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    OpenLoopSr,
    OpenLoopCr,
    ClosedLoopSr,
    ClosedLoopCr,
    FocSr,
    FocCr,
}

impl TryFrom<u8> for MotionMode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use MotionMode::*;
        match value {
            0 => Ok(OpenLoopSr),
            1 => Ok(OpenLoopCr),
            2 => Ok(ClosedLoopSr),
            3 => Ok(ClosedLoopCr),
            4 => Ok(FocSr),
            5 => Ok(FocCr),
            other => Err(CodecError::BadEnumValue { field: "motion_mode", value: other }),
        }
    }
}

impl MotionMode {
    pub fn as_u8(self) -> u8 {
        use MotionMode::*;
        match self {
            OpenLoopSr => 0,
            OpenLoopCr => 1,
            ClosedLoopSr => 2,
            ClosedLoopCr => 3,
            FocSr => 4,
            FocCr => 5,
        }
    }
}

/// Bus baud rate, as the driver's index-coded wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaudRate {
    B9600,
    B19200,
    B25000,
    B38400,
    B57600,
    B115200,
    B256000,
}

impl BaudRate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            BaudRate::B9600 => 9_600,
            BaudRate::B19200 => 19_200,
            BaudRate::B25000 => 25_000,
            BaudRate::B38400 => 38_400,
            BaudRate::B57600 => 57_600,
            BaudRate::B115200 => 115_200,
            BaudRate::B256000 => 256_000,
        }
    }

    pub fn wire_index(self) -> u8 {
        match self {
            BaudRate::B9600 => 0,
            BaudRate::B19200 => 1,
            BaudRate::B25000 => 2,
            BaudRate::B38400 => 3,
            BaudRate::B57600 => 4,
            BaudRate::B115200 => 5,
            BaudRate::B256000 => 6,
        }
    }
}

impl TryFrom<u8> for BaudRate {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use BaudRate::*;
        match value {
            0 => Ok(B9600),
            1 => Ok(B19200),
            2 => Ok(B25000),
            3 => Ok(B38400),
            4 => Ok(B57600),
            5 => Ok(B115200),
            6 => Ok(B256000),
            other => Err(CodecError::BadEnumValue { field: "baud_rate", value: other }),
        }
    }
}

/// Fixed-layout snapshot returned by the bulk status query (31-byte
/// payload): carry+addition encoder, RPM, pulses, IO, angle error, and the
/// three boolean flags the individual single-field queries also expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBundle {
    pub encoder_counts: i64,
    pub rpm: i16,
    pub pulses: i32,
    pub io: IoBitmap,
    pub angle_error_counts: i32,
    pub enabled: bool,
    pub stalled: bool,
    pub home_status: HomeStatus,
}

impl StatusBundle {
    pub const PAYLOAD_LEN: usize = 31;

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() != Self::PAYLOAD_LEN {
            return Err(CodecError::BadPayloadLen {
                need: Self::PAYLOAD_LEN,
                got: payload.len(),
            });
        }

        let mut encoder_bytes = [0u8; 6];
        encoder_bytes.copy_from_slice(&payload[0..6]);
        let encoder_counts = decode_i48(encoder_bytes);

        let rpm = decode_i16([payload[6], payload[7]]);

        let pulses = decode_i32([payload[8], payload[9], payload[10], payload[11]]);

        let io = IoBitmap(payload[12]);

        let angle_error_counts =
            decode_i32([payload[13], payload[14], payload[15], payload[16]]);

        let enabled = payload[17] != 0;
        let stalled = payload[18] != 0;
        let home_status = HomeStatus::try_from(payload[19])?;

        // payload[20..31] reserved.

        Ok(StatusBundle {
            encoder_counts,
            rpm,
            pulses,
            io,
            angle_error_counts,
            enabled,
            stalled,
            home_status,
        })
    }
}

/// Fixed-layout snapshot returned by the "all parameters" bulk read
/// (38-byte payload): the configuration surface in one shot, used at
/// startup to seed an axis's runtime state without one query per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllParametersBundle {
    pub bus_address: u8,
    pub working_current_ma: u16,
    pub holding_current_percent: u8,
    pub microstep: u16,
    pub mode: MotionMode,
    pub en_active_low: bool,
    pub direction_reversed: bool,
    pub key_locked: bool,
    pub stall_protect_enabled: bool,
    pub microstep_interpolation: bool,
    pub baud_rate: BaudRate,
}

impl AllParametersBundle {
    pub const PAYLOAD_LEN: usize = 38;

    pub fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        if payload.len() != Self::PAYLOAD_LEN {
            return Err(CodecError::BadPayloadLen {
                need: Self::PAYLOAD_LEN,
                got: payload.len(),
            });
        }

        let bus_address = payload[0];
        let working_current_ma = u16::from_be_bytes([payload[1], payload[2]]);
        let holding_current_percent = payload[3];
        let microstep = decode_microstep(payload[4]);
        let mode = MotionMode::try_from(payload[5])?;
        let en_active_low = payload[6] != 0;
        let direction_reversed = payload[7] != 0;
        let key_locked = payload[8] != 0;
        let stall_protect_enabled = payload[9] != 0;
        let microstep_interpolation = payload[10] != 0;
        let baud_rate = BaudRate::try_from(payload[11])?;

        // payload[12..38] reserved (PID gains, accel ramps, homing params —
        // exposed individually via their dedicated config opcodes rather
        // than parsed out of the bulk bundle).

        Ok(AllParametersBundle {
            bus_address,
            working_current_ma,
            holding_current_percent,
            microstep,
            mode,
            en_active_low,
            direction_reversed,
            key_locked,
            stall_protect_enabled,
            microstep_interpolation,
            baud_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_payload() -> Vec<u8> {
        let mut p = vec![0u8; StatusBundle::PAYLOAD_LEN];
        p[0..6].copy_from_slice(&[0, 0, 0, 0, 0, 42]); // encoder_counts = 42
        p[6..8].copy_from_slice(&1200i16.to_be_bytes()); // rpm
        p[8..12].copy_from_slice(&100_000i32.to_be_bytes()); // pulses
        p[12] = 0b0000_0101; // in1 + out1
        p[13..17].copy_from_slice(&(-7i32).to_be_bytes()); // angle error
        p[17] = 1; // enabled
        p[18] = 0; // not stalled
        p[19] = 1; // home success
        p
    }

    #[test]
    fn decodes_status_bundle_fields() {
        let bundle = StatusBundle::decode(&status_payload()).unwrap();
        assert_eq!(bundle.encoder_counts, 42);
        assert_eq!(bundle.rpm, 1200);
        assert_eq!(bundle.pulses, 100_000);
        assert!(bundle.io.in1());
        assert!(!bundle.io.in2());
        assert!(bundle.io.out1());
        assert_eq!(bundle.angle_error_counts, -7);
        assert!(bundle.enabled);
        assert!(!bundle.stalled);
        assert_eq!(bundle.home_status, HomeStatus::Success);
    }

    #[test]
    fn rejects_wrong_length_status_payload() {
        let err = StatusBundle::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            CodecError::BadPayloadLen {
                need: StatusBundle::PAYLOAD_LEN,
                got: 10
            }
        );
    }

    fn all_parameters_payload() -> Vec<u8> {
        let mut p = vec![0u8; AllParametersBundle::PAYLOAD_LEN];
        p[0] = 1; // bus_address
        p[1..3].copy_from_slice(&2000u16.to_be_bytes()); // working current mA
        p[3] = 50; // holding current %
        p[4] = 16; // microstep
        p[5] = MotionMode::ClosedLoopCr.as_u8();
        p[6] = 0; // en active high
        p[7] = 1; // direction reversed
        p[8] = 0; // key unlocked
        p[9] = 1; // stall protect on
        p[10] = 1; // interpolation on
        p[11] = BaudRate::B115200.wire_index();
        p
    }

    #[test]
    fn decodes_all_parameters_bundle_fields() {
        let bundle = AllParametersBundle::decode(&all_parameters_payload()).unwrap();
        assert_eq!(bundle.bus_address, 1);
        assert_eq!(bundle.working_current_ma, 2000);
        assert_eq!(bundle.holding_current_percent, 50);
        assert_eq!(bundle.microstep, 16);
        assert_eq!(bundle.mode, MotionMode::ClosedLoopCr);
        assert!(!bundle.en_active_low);
        assert!(bundle.direction_reversed);
        assert!(!bundle.key_locked);
        assert!(bundle.stall_protect_enabled);
        assert!(bundle.microstep_interpolation);
        assert_eq!(bundle.baud_rate, BaudRate::B115200);
    }

    #[test]
    fn microstep_zero_in_bundle_means_256() {
        let mut p = all_parameters_payload();
        p[4] = 0;
        let bundle = AllParametersBundle::decode(&p).unwrap();
        assert_eq!(bundle.microstep, 256);
    }

    #[test]
    fn rejects_out_of_range_home_status_as_bad_enum_value_not_unknown_opcode() {
        let mut p = status_payload();
        p[19] = 9;
        let err = StatusBundle::decode(&p).unwrap_err();
        assert_eq!(err, CodecError::BadEnumValue { field: "home_status", value: 9 });
    }

    #[test]
    fn rejects_out_of_range_baud_rate_as_bad_enum_value() {
        let mut p = all_parameters_payload();
        p[11] = 200;
        let err = AllParametersBundle::decode(&p).unwrap_err();
        assert_eq!(err, CodecError::BadEnumValue { field: "baud_rate", value: 200 });
    }
}
