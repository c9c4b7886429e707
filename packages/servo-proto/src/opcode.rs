//! The command catalog (`spec.md` §6) — every opcode this core must speak.

use crate::error::CodecError;

/// Fixed opcode for every supported servo-bus command.
///
/// Kept as a fieldless `#[repr(u8)]` enum so encode/decode is a single byte
/// cast in each direction; unknown bytes decode to
/// [`CodecError::UnknownOpcode`] rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Query
    CarryEncoder = 0x30,
    AdditionEncoder = 0x31,
    Rpm = 0x32,
    Pulses = 0x33,
    IoRead = 0x34,
    RawEncoder = 0x35,
    IoWrite = 0x36,
    AngleError = 0x39,
    EnableStatus = 0x3A,
    HomeStatus = 0x3B,
    ReleaseLockedRotor = 0x3D,
    StallFlag = 0x3E,

    // Version / bulk
    Version = 0x40,
    AllParameters = 0x47,
    StatusBundle = 0x48,

    // Configuration (0x80..=0x9E)
    WorkingCurrent = 0x80,
    HoldingCurrent = 0x82,
    Microstep = 0x84,
    Mode = 0x86,
    EnPolarity = 0x88,
    Direction = 0x8A,
    KeyLock = 0x8C,
    StallProtect = 0x8E,
    MicrostepInterpolation = 0x90,
    BaudRate = 0x92,
    BusAddress = 0x94,
    Pid = 0x96,
    StartStopAcceleration = 0x98,
    LimitSwitchHomeParams = 0x9A,
    StallHomeParams = 0x9C,
    RestoreFactory = 0x9E,

    // Homing / zero
    ExecuteHome = 0x3C,
    SetZero = 0x3F,

    // Motion
    EnableDisable = 0xF3,
    RelativeAxis = 0xF4,
    AbsoluteAxis = 0xF5,
    SpeedMode = 0xF6,
    EmergencyStop = 0xF7,
    RelativePulse = 0xFD,
    AbsolutePulse = 0xFE,
    SaveOnPower = 0xFF,
}

impl Opcode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        Ok(match value {
            0x30 => CarryEncoder,
            0x31 => AdditionEncoder,
            0x32 => Rpm,
            0x33 => Pulses,
            0x34 => IoRead,
            0x35 => RawEncoder,
            0x36 => IoWrite,
            0x39 => AngleError,
            0x3A => EnableStatus,
            0x3B => HomeStatus,
            0x3C => ExecuteHome,
            0x3D => ReleaseLockedRotor,
            0x3E => StallFlag,
            0x3F => SetZero,
            0x40 => Version,
            0x47 => AllParameters,
            0x48 => StatusBundle,
            0x80 => WorkingCurrent,
            0x82 => HoldingCurrent,
            0x84 => Microstep,
            0x86 => Mode,
            0x88 => EnPolarity,
            0x8A => Direction,
            0x8C => KeyLock,
            0x8E => StallProtect,
            0x90 => MicrostepInterpolation,
            0x92 => BaudRate,
            0x94 => BusAddress,
            0x96 => Pid,
            0x98 => StartStopAcceleration,
            0x9A => LimitSwitchHomeParams,
            0x9C => StallHomeParams,
            0x9E => RestoreFactory,
            0xF3 => EnableDisable,
            0xF4 => RelativeAxis,
            0xF5 => AbsoluteAxis,
            0xF6 => SpeedMode,
            0xF7 => EmergencyStop,
            0xFD => RelativePulse,
            0xFE => AbsolutePulse,
            0xFF => SaveOnPower,
            other => return Err(CodecError::UnknownOpcode(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_documented_opcode() {
        let documented = [
            0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F,
            0x40, 0x47, 0x48, 0x80, 0x82, 0x84, 0x86, 0x88, 0x8A, 0x8C, 0x8E, 0x90, 0x92, 0x94,
            0x96, 0x98, 0x9A, 0x9C, 0x9E, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xFD, 0xFE, 0xFF,
        ];
        for byte in documented {
            let op = Opcode::try_from(byte).expect("documented opcode must parse");
            assert_eq!(op.as_u8(), byte);
        }
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert_eq!(Opcode::try_from(0x01), Err(CodecError::UnknownOpcode(0x01)));
    }
}
