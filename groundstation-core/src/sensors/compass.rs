//! Compass fusion (§4.4): heading from a calibrated magnetometer, with
//! tilt compensation from IMU pitch/roll and a configurable magnetic
//! declination correction.

/// Tilt-compensate a calibrated magnetometer reading using pitch/roll (in
/// degrees) and return a heading in `[0, 360)` degrees, including the
/// configured magnetic declination.
pub fn heading_deg(
    mx_cal: f64,
    my_cal: f64,
    mz_cal: f64,
    pitch_deg: f64,
    roll_deg: f64,
    declination_deg: f64,
) -> f64 {
    let pitch = pitch_deg.to_radians();
    let roll = roll_deg.to_radians();

    let mx_comp = mx_cal * pitch.cos() + mz_cal * pitch.sin();
    let my_comp =
        mx_cal * roll.sin() * pitch.sin() + my_cal * roll.cos() - mz_cal * roll.sin() * pitch.cos();

    let raw_heading = (-my_comp).atan2(mx_comp).to_degrees();
    normalize_heading(raw_heading + declination_deg)
}

/// Heading with no tilt compensation (level mount), per §4.4's plain
/// formula: `heading = atan2(-my_cal, mx_cal)`.
pub fn heading_deg_level(mx_cal: f64, my_cal: f64, declination_deg: f64) -> f64 {
    let raw_heading = (-my_cal).atan2(mx_cal).to_degrees();
    normalize_heading(raw_heading + declination_deg)
}

fn normalize_heading(deg: f64) -> f64 {
    let wrapped = deg % 360.0;
    if wrapped < 0.0 {
        wrapped + 360.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_heading_points_north_when_field_points_along_x() {
        let heading = heading_deg_level(1.0, 0.0, 0.0);
        assert!(heading.abs() < 1e-9);
    }

    #[test]
    fn level_heading_points_east_when_field_points_along_negative_y() {
        let heading = heading_deg_level(0.0, -1.0, 0.0);
        assert!((heading - 90.0).abs() < 1e-9);
    }

    #[test]
    fn declination_shifts_heading_and_wraps() {
        let heading = heading_deg_level(1.0, 0.0, 350.0);
        assert!((heading - 350.0).abs() < 1e-9);
    }

    #[test]
    fn tilt_compensated_matches_level_when_flat() {
        let a = heading_deg(1.0, 0.0, 0.2, 0.0, 0.0, 0.0);
        let b = heading_deg_level(1.0, 0.0, 0.0);
        assert!((a - b).abs() < 1e-9);
    }
}
