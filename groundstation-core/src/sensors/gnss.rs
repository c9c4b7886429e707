//! GNSS reader (§4.4): line-oriented NMEA 0183, using the `nmea` crate the
//! same way the rocketry reference file's `gps_loop` does — feed each
//! complete `$...\r\n` sentence to the parser, then republish the latest
//! fix into a `watch` channel.

use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use nmea::{Nmea, SentenceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixQuality {
    None,
    Fix2d,
    Fix3d,
    DeadReckoning,
    Time,
}

#[derive(Debug, Clone, Copy)]
pub struct Fix {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub altitude_msl_m: f64,
    pub speed_mps: f64,
    pub course_deg: f64,
    pub quality: FixQuality,
    pub satellite_count: u32,
    pub hdop: f64,
}

#[derive(Debug, Clone, Default)]
pub struct GnssSnapshot {
    pub fix: Option<Fix>,
    last_gga_at: Option<Instant>,
}

impl GnssSnapshot {
    /// Seconds since the last valid GGA sentence, or infinity if none has
    /// ever arrived.
    pub fn gga_age_s(&self) -> f64 {
        self.last_gga_at.map(|at| at.elapsed().as_secs_f64()).unwrap_or(f64::INFINITY)
    }

    /// §4.4: "Declare `no-fix` if no valid GGA has arrived in the last
    /// `stale_after_s` seconds" (default 5s).
    pub fn no_fix_for(&self, stale_after_s: f64) -> bool {
        self.gga_age_s() > stale_after_s
    }
}

fn quality_from_fix_type(has_fix: bool) -> FixQuality {
    if has_fix {
        FixQuality::Fix3d
    } else {
        FixQuality::None
    }
}

/// Run the GNSS reader loop: accumulate bytes into lines, parse complete
/// `$...` sentences, and publish the latest fix. `no-fix` is declared if no
/// valid GGA has arrived in the last 5s (§4.4), tracked via `health()`
/// rather than blocking the publish path.
pub async fn run<T>(mut port: T, snapshot: watch::Sender<GnssSnapshot>)
where
    T: tokio::io::AsyncRead + Unpin,
{
    let mut parser = match Nmea::create_for_navigation(&[
        SentenceType::GGA,
        SentenceType::RMC,
        SentenceType::GSV,
        SentenceType::GSA,
    ]) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to construct NMEA parser: {e}");
            return;
        }
    };

    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match port.read(&mut byte).await {
            Ok(0) => {
                warn!("GNSS port closed (EOF)");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("GNSS read error: {e}");
                return;
            }
        }

        if byte[0] != b'\n' {
            line.push(byte[0]);
            continue;
        }

        let sentence = String::from_utf8_lossy(&line).trim_end().to_string();
        line.clear();

        if !sentence.starts_with('$') {
            continue;
        }

        let is_gga = sentence.len() > 6 && &sentence[3..6] == "GGA";

        match parser.parse_for_fix(&sentence) {
            Ok(_) => {
                debug!(%sentence, "parsed NMEA sentence");
            }
            Err(e) => {
                debug!("unparsed/invalid NMEA sentence: {e:?}");
                continue;
            }
        }

        if let (Some(lat), Some(lon)) = (parser.latitude(), parser.longitude()) {
            let fix = Fix {
                lat_deg: lat,
                lon_deg: lon,
                altitude_msl_m: parser.altitude().unwrap_or(0.0) as f64,
                speed_mps: parser.speed_over_ground().unwrap_or(0.0) as f64 * 0.514444,
                course_deg: parser.true_course().unwrap_or(0.0) as f64,
                quality: quality_from_fix_type(true),
                satellite_count: parser.fix_satellites().unwrap_or(0) as u32,
                hdop: parser.hdop().unwrap_or(0.0) as f64,
            };
            snapshot.send_modify(|s| {
                s.fix = Some(fix);
                if is_gga {
                    s.last_gga_at = Some(Instant::now());
                }
            });
        } else if is_gga {
            snapshot.send_modify(|s| s.last_gga_at = Some(Instant::now()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_fix_for_reports_fresh_just_after_a_gga() {
        let mut s = GnssSnapshot::default();
        s.last_gga_at = Some(Instant::now());
        assert!(!s.no_fix_for(5.0));
    }

    #[test]
    fn no_fix_for_is_stale_when_never_seen() {
        let s = GnssSnapshot::default();
        assert!(s.no_fix_for(5.0));
    }

    #[test]
    fn no_fix_for_respects_the_configured_threshold() {
        let mut s = GnssSnapshot::default();
        s.last_gga_at = Some(Instant::now() - std::time::Duration::from_secs(10));
        assert!(s.no_fix_for(5.0));
        assert!(!s.no_fix_for(20.0));
    }
}
