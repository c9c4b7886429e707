//! IMU stream simulator: periodic `0x55`-framed packets in the exact layout
//! `groundstation-core`'s `sensors::imu` reader decodes (`spec.md` §4.4),
//! with Gaussian noise on each channel in the teacher's `rand_distr`
//! fashion.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tracing::{info, warn};

const FRAME_HEADER: u8 = 0x55;
const PID_ACCEL: u8 = 0x51;
const PID_EULER: u8 = 0x53;
const PID_MAG: u8 = 0x54;

const PACKET_RATE_HZ: f64 = 50.0;

fn checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn frame(pid: u8, data: [u8; 8]) -> [u8; 11] {
    let mut out = [0u8; 11];
    out[0] = FRAME_HEADER;
    out[1] = pid;
    out[2..10].copy_from_slice(&data);
    out[10] = checksum8(&out[..10]);
    out
}

fn accel_frame(noise: &Normal<f64>, rng: &mut StdRng) -> [u8; 11] {
    let g = |mean: f64| ((mean + noise.sample(rng)) / 16.0 * 32768.0) as i16;
    let mut data = [0u8; 8];
    data[0..2].copy_from_slice(&g(0.0).to_le_bytes());
    data[2..4].copy_from_slice(&g(0.0).to_le_bytes());
    data[4..6].copy_from_slice(&g(1.0).to_le_bytes()); // resting on the Z axis
    data[6..8].copy_from_slice(&((25.0 * 100.0) as i16).to_le_bytes());
    frame(PID_ACCEL, data)
}

fn euler_frame(heading_deg: f64, noise: &Normal<f64>, rng: &mut StdRng) -> [u8; 11] {
    let scale = |deg: f64| ((deg + noise.sample(rng)) / 180.0 * 32768.0) as i16;
    let mut data = [0u8; 8];
    data[0..2].copy_from_slice(&scale(0.0).to_le_bytes());
    data[2..4].copy_from_slice(&scale(0.0).to_le_bytes());
    data[4..6].copy_from_slice(&scale(heading_deg).to_le_bytes());
    data[6..8].copy_from_slice(&((25.0 * 100.0) as i16).to_le_bytes());
    frame(PID_EULER, data)
}

fn mag_frame(rng: &mut StdRng, noise: &Normal<f64>) -> [u8; 11] {
    let v = |mean: i16| (mean as f64 + noise.sample(rng)) as i16;
    let mut data = [0u8; 8];
    data[0..2].copy_from_slice(&v(200).to_le_bytes());
    data[2..4].copy_from_slice(&v(0).to_le_bytes());
    data[4..6].copy_from_slice(&v(400).to_le_bytes());
    data[6..8].copy_from_slice(&((25.0 * 100.0) as i16).to_le_bytes());
    frame(PID_MAG, data)
}

/// Accept one IMU client at a time and stream frames at `PACKET_RATE_HZ`
/// until it disconnects, then wait for the next one.
pub async fn serve(listen_addr: &str) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = listen_addr, "IMU stream simulator listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "IMU client connected");
        if let Err(e) = stream_to(stream).await {
            warn!("IMU stream ended: {e}");
        }
    }
}

async fn stream_to(mut stream: TcpStream) -> std::io::Result<()> {
    let mut rng = StdRng::from_entropy();
    let noise = Normal::new(0.0, 0.05).expect("fixed stddev is always valid");
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / PACKET_RATE_HZ));
    let mut tick: u64 = 0;

    loop {
        interval.tick().await;
        let heading_deg = (tick as f64 * 0.5) % 360.0;
        let packet = match tick % 3 {
            0 => accel_frame(&noise, &mut rng),
            1 => euler_frame(heading_deg, &noise, &mut rng),
            _ => mag_frame(&mut rng, &noise),
        };
        stream.write_all(&packet).await?;
        tick += 1;
    }
}
