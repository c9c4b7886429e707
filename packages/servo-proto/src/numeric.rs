//! Numeric semantics shared by the codec and the bench simulator
//! (`spec.md` §4.1, "Numeric semantics").

/// Encoder counts per revolution.
pub const COUNTS_PER_REV: i64 = 16384;

/// Full steps per revolution (pulses = microstep × 200).
pub const STEPS_PER_REV: i64 = 200;

/// Highest RPM magnitude the speed word can carry.
pub const MAX_RPM: u16 = 3000;

/// Convert a 48-bit signed accumulated encoder count to an angle in degrees.
///
/// Uses 64-bit arithmetic throughout so the multiply cannot overflow even at
/// the full 48-bit magnitude (`spec.md` invariant I4).
pub fn counts_to_angle(counts: i64) -> f64 {
    (counts as f64) * 360.0 / (COUNTS_PER_REV as f64)
}

/// Convert an angle in degrees to the nearest encoder count.
pub fn angle_to_counts(angle_deg: f64) -> i64 {
    (angle_deg * (COUNTS_PER_REV as f64) / 360.0).round() as i64
}

/// Convert a pulse count to an angle in degrees, given the current
/// microstep setting (pulses/rev = microstep × 200).
pub fn pulses_to_angle(pulses: i32, microstep: u16) -> f64 {
    let pulses_per_rev = (microstep as i64) * STEPS_PER_REV;
    (pulses as f64) * 360.0 / (pulses_per_rev as f64)
}

/// Convert an angle in degrees to a pulse count at the given microstep
/// setting.
pub fn angle_to_pulses(angle_deg: f64, microstep: u16) -> i32 {
    let pulses_per_rev = (microstep as i64) * STEPS_PER_REV;
    (angle_deg * (pulses_per_rev as f64) / 360.0).round() as i32
}

/// RPM → deg/s (`deg/s = RPM × 6`).
pub fn rpm_to_deg_s(rpm: f64) -> f64 {
    rpm * 6.0
}

/// deg/s → RPM.
pub fn deg_s_to_rpm(deg_s: f64) -> f64 {
    deg_s / 6.0
}

/// Decode the microstep wire encoding: `0` means 256, everything else is
/// literal.
pub fn decode_microstep(wire: u8) -> u16 {
    if wire == 0 {
        256
    } else {
        wire as u16
    }
}

/// Encode a microstep setting for the wire: 256 wraps to `0`.
pub fn encode_microstep(microstep: u16) -> u8 {
    if microstep == 256 {
        0
    } else {
        microstep as u8
    }
}

/// Valid microstep settings (`spec.md` §8, Boundary behaviors).
pub const VALID_MICROSTEPS: [u16; 9] = [1, 2, 4, 8, 16, 32, 64, 128, 256];

pub fn is_valid_microstep(microstep: u16) -> bool {
    VALID_MICROSTEPS.contains(&microstep)
}

/// Decode a 6-byte big-endian two's-complement encoder value, sign-extending
/// from bit 47 so that `80 00 00 00 00 00` decodes to the minimum negative
/// 48-bit value rather than a large positive one.
pub fn decode_i48(bytes: [u8; 6]) -> i64 {
    let mut buf = [0u8; 8];
    buf[2..8].copy_from_slice(&bytes);
    let zero_extended = u64::from_be_bytes(buf); // value sits in the low 48 bits
    let shift = 64 - 48;
    ((zero_extended << shift) as i64) >> shift
}

/// Encode a 48-bit signed value into 6 big-endian bytes (low 48 bits of `v`).
pub fn encode_i48(v: i64) -> [u8; 6] {
    let bytes = v.to_be_bytes();
    let mut out = [0u8; 6];
    out.copy_from_slice(&bytes[2..8]);
    out
}

/// Decode a 4-byte big-endian signed pulse count.
pub fn decode_i32(bytes: [u8; 4]) -> i32 {
    i32::from_be_bytes(bytes)
}

pub fn encode_i32(v: i32) -> [u8; 4] {
    v.to_be_bytes()
}

/// Decode a 2-byte big-endian signed RPM value.
pub fn decode_i16(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

pub fn encode_i16(v: i16) -> [u8; 2] {
    v.to_be_bytes()
}

/// Speed word: low 15 bits = RPM magnitude (1..=3000), top bit = direction
/// (0 = forward, 1 = reverse).
pub fn encode_speed_word(rpm: u16, reverse: bool) -> u16 {
    let magnitude = rpm.min(MAX_RPM) & 0x7FFF;
    if reverse {
        magnitude | 0x8000
    } else {
        magnitude
    }
}

/// Decode a speed word into (rpm magnitude, reverse flag).
pub fn decode_speed_word(word: u16) -> (u16, bool) {
    (word & 0x7FFF, word & 0x8000 != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_encoder_round_trip_within_one_count() {
        let samples: [i64; 5] = [0, 1, -1, 1_000_000_000, -1_000_000_000];
        for c in samples {
            assert!(c.unsigned_abs() < (1i64 << 40) as u64);
            let angle = counts_to_angle(c);
            let back = angle_to_counts(angle);
            assert!((back - c).abs() <= 1, "c={c} back={back}");
        }
    }

    #[test]
    fn sign_extends_minimum_negative_48_bit_value() {
        let bytes = [0x80, 0x00, 0x00, 0x00, 0x00, 0x00];
        let decoded = decode_i48(bytes);
        assert_eq!(decoded, -(1i64 << 47));
    }

    #[test]
    fn sign_extension_round_trips_through_encode() {
        for v in [0i64, 1, -1, -(1 << 47), (1 << 47) - 1] {
            let bytes = encode_i48(v);
            assert_eq!(decode_i48(bytes), v);
        }
    }

    #[test]
    fn rpm_deg_s_conversion() {
        assert_eq!(rpm_to_deg_s(10.0), 60.0);
        assert_eq!(deg_s_to_rpm(60.0), 10.0);
    }

    #[test]
    fn microstep_zero_means_256() {
        assert_eq!(decode_microstep(0), 256);
        assert_eq!(encode_microstep(256), 0);
        for &m in &VALID_MICROSTEPS {
            assert!(is_valid_microstep(m));
        }
        assert!(!is_valid_microstep(3));
    }

    #[test]
    fn speed_word_clamps_and_carries_direction() {
        let word = encode_speed_word(5000, true);
        let (rpm, reverse) = decode_speed_word(word);
        assert_eq!(rpm, MAX_RPM);
        assert!(reverse);

        let word = encode_speed_word(0, false);
        let (rpm, reverse) = decode_speed_word(word);
        assert_eq!(rpm, 0);
        assert!(!reverse);
    }

    #[test]
    fn pulses_per_rev_scales_with_microstep() {
        assert_eq!(angle_to_pulses(360.0, 1), 200);
        assert_eq!(angle_to_pulses(360.0, 256), 51200);
        assert_eq!(pulses_to_angle(200, 1), 360.0);
    }
}
