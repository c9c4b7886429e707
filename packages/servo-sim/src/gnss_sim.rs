//! GNSS stream simulator: periodic NMEA GGA/RMC sentences in the format
//! `groundstation-core`'s `sensors::gnss` reader parses via the `nmea`
//! crate (`spec.md` §4.4). Honors the `GnssDropout` scenario by simply
//! stopping transmission after a configured elapsed time.

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

use crate::scenarios::{ScenarioConfig, ScenarioType};

const FIX_RATE_HZ: f64 = 1.0;

/// Fixed simulated ground position — a bench sits still, unlike the boats
/// the teacher's UWB simulator modeled.
const LAT_DEG: f64 = 34.2007;
const LON_DEG: f64 = -118.1714;

fn nmea_checksum(sentence: &str) -> u8 {
    sentence.bytes().fold(0u8, |acc, b| acc ^ b)
}

fn with_checksum(body: &str) -> String {
    format!("${body}*{:02X}\r\n", nmea_checksum(body))
}

/// Decompose a signed degree value into NMEA's `ddmm.mmmm` magnitude plus
/// its hemisphere letter.
fn to_ddmm(deg: f64, positive: char, negative: char) -> (f64, char) {
    let hemi = if deg >= 0.0 { positive } else { negative };
    let abs = deg.abs();
    let whole = abs.trunc();
    let minutes = (abs - whole) * 60.0;
    (whole * 100.0 + minutes, hemi)
}

fn gga_sentence(lat: f64, lon: f64, satellites: u32) -> String {
    let (lat_ddmm, lat_hemi) = to_ddmm(lat, 'N', 'S');
    let (lon_ddmm, lon_hemi) = to_ddmm(lon, 'E', 'W');
    let body = format!(
        "GPGGA,120000.00,{lat_ddmm:09.4},{lat_hemi},{lon_ddmm:09.4},{lon_hemi},1,{satellites:02},0.9,50.0,M,0.0,M,,"
    );
    with_checksum(&body)
}

fn rmc_sentence(lat: f64, lon: f64) -> String {
    let (lat_ddmm, lat_hemi) = to_ddmm(lat, 'N', 'S');
    let (lon_ddmm, lon_hemi) = to_ddmm(lon, 'E', 'W');
    let body =
        format!("GPRMC,120000.00,A,{lat_ddmm:09.4},{lat_hemi},{lon_ddmm:09.4},{lon_hemi},0.0,0.0,010124,,,A");
    with_checksum(&body)
}

pub async fn serve(listen_addr: &str, scenarios: ScenarioConfig) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = listen_addr, "GNSS stream simulator listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "GNSS client connected");
        if let Err(e) = stream_to(stream, &scenarios).await {
            warn!("GNSS stream ended: {e}");
        }
    }
}

async fn stream_to(mut stream: TcpStream, scenarios: &ScenarioConfig) -> std::io::Result<()> {
    let started_at = Instant::now();
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / FIX_RATE_HZ));
    let mut tick: u64 = 0;

    loop {
        interval.tick().await;

        if scenarios.has(&ScenarioType::GnssDropout)
            && started_at.elapsed().as_secs_f64() >= scenarios.gnss_dropout_after_s
        {
            // Stop transmitting; the client will observe a stale fix via
            // its own staleness timeout rather than a closed socket, which
            // matches a receiver that has lost satellite lock in place.
            std::future::pending::<()>().await;
        }

        let sentence = if tick % 5 == 0 {
            rmc_sentence(LAT_DEG, LON_DEG)
        } else {
            gga_sentence(LAT_DEG, LON_DEG, 9)
        };
        stream.write_all(sentence.as_bytes()).await?;
        tick += 1;
    }
}
