//! IMU reader (§4.4): 11-byte framed binary stream, auto-baud detection,
//! demux by packet-ID into latest-value slots.
//!
//! **Critical invariant** (§4.4): no configuration command is ever sent
//! immediately after opening the port. Some firmware revisions silently
//! pause streaming when reconfigured right after open, so this reader is
//! decode-only at startup; configuration only happens via an explicit,
//! later operator call wrapped in the unlock/lock sequence.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const FRAME_HEADER: u8 = 0x55;
const FRAME_LEN: usize = 11;

const PID_ACCEL: u8 = 0x51;
const PID_GYRO: u8 = 0x52;
const PID_EULER: u8 = 0x53;
const PID_MAG: u8 = 0x54;
const PID_PRESSURE_ALTITUDE: u8 = 0x56;
const PID_GPS_AUX: u8 = 0x57;
const PID_QUATERNION: u8 = 0x59;

const UNLOCK_SEQUENCE: [u8; 5] = [0xFF, 0xAA, 0x69, 0x88, 0xB5];
const LOCK_SEQUENCE: [u8; 5] = [0xFF, 0xAA, 0x6A, 0xB5, 0x88];

/// One decoded IMU packet, tagged by the quantity it carries (§4.4:
/// "accelerometer, gyro, Euler angles, magnetometer, quaternion,
/// pressure/altitude, GPS auxiliary").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImuPacket {
    Accel { x_g: f32, y_g: f32, z_g: f32, temp_c: f32 },
    Gyro { x_dps: f32, y_dps: f32, z_dps: f32, temp_c: f32 },
    Euler { roll_deg: f32, pitch_deg: f32, yaw_deg: f32, temp_c: f32 },
    Magnetometer { x_raw: i16, y_raw: i16, z_raw: i16, temp_c: f32 },
    Quaternion { q0: f32, q1: f32, q2: f32, q3: f32 },
    PressureAltitude { pressure_pa: f32, altitude_m: f32 },
    GpsAux { lon: f64, lat: f64 },
}

/// Latest-value slot per packet category, each independently timestamped
/// (§3, "Sensor state"). Updated atomically on decode so readers always
/// observe a fully formed value or `None`.
#[derive(Debug, Clone, Default)]
pub struct ImuSnapshot {
    pub accel: Option<(ImuPacket, Stamped)>,
    pub gyro: Option<(ImuPacket, Stamped)>,
    pub euler: Option<(ImuPacket, Stamped)>,
    pub magnetometer: Option<(ImuPacket, Stamped)>,
    pub quaternion: Option<(ImuPacket, Stamped)>,
    pub pressure_altitude: Option<(ImuPacket, Stamped)>,
    pub gps_aux: Option<(ImuPacket, Stamped)>,
}

/// Newtype so `ImuSnapshot` can derive `Default` (`tokio::time::Instant`
/// has no meaningful default).
#[derive(Debug, Clone, Copy)]
pub struct Stamped(pub Instant);

impl Default for Stamped {
    fn default() -> Self {
        Stamped(Instant::now())
    }
}

impl ImuSnapshot {
    fn apply(&mut self, pid: u8, packet: ImuPacket) {
        let stamped = Some((packet, Stamped(Instant::now())));
        match pid {
            PID_ACCEL => self.accel = stamped,
            PID_GYRO => self.gyro = stamped,
            PID_EULER => self.euler = stamped,
            PID_MAG => self.magnetometer = stamped,
            PID_QUATERNION => self.quaternion = stamped,
            PID_PRESSURE_ALTITUDE => self.pressure_altitude = stamped,
            PID_GPS_AUX => self.gps_aux = stamped,
            _ => {}
        }
    }

    /// Age, in seconds, of the freshest packet of any kind — used by
    /// `health()` to derive the IMU data-freshness threshold.
    pub fn freshest_age_s(&self) -> f64 {
        [
            &self.accel,
            &self.gyro,
            &self.euler,
            &self.magnetometer,
            &self.quaternion,
            &self.pressure_altitude,
            &self.gps_aux,
        ]
        .iter()
        .filter_map(|slot| slot.as_ref().map(|(_, t)| t.0.elapsed().as_secs_f64()))
        .fold(f64::INFINITY, f64::min)
    }
}

fn checksum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn decode_data(pid: u8, data: [u8; 8]) -> Option<ImuPacket> {
    let i16_at = |i: usize| i16::from_le_bytes([data[i], data[i + 1]]);
    match pid {
        PID_ACCEL => Some(ImuPacket::Accel {
            x_g: i16_at(0) as f32 / 32768.0 * 16.0,
            y_g: i16_at(2) as f32 / 32768.0 * 16.0,
            z_g: i16_at(4) as f32 / 32768.0 * 16.0,
            temp_c: i16_at(6) as f32 / 100.0,
        }),
        PID_GYRO => Some(ImuPacket::Gyro {
            x_dps: i16_at(0) as f32 / 32768.0 * 2000.0,
            y_dps: i16_at(2) as f32 / 32768.0 * 2000.0,
            z_dps: i16_at(4) as f32 / 32768.0 * 2000.0,
            temp_c: i16_at(6) as f32 / 100.0,
        }),
        PID_EULER => Some(ImuPacket::Euler {
            roll_deg: i16_at(0) as f32 / 32768.0 * 180.0,
            pitch_deg: i16_at(2) as f32 / 32768.0 * 180.0,
            yaw_deg: i16_at(4) as f32 / 32768.0 * 180.0,
            temp_c: i16_at(6) as f32 / 100.0,
        }),
        PID_MAG => Some(ImuPacket::Magnetometer {
            x_raw: i16_at(0),
            y_raw: i16_at(2),
            z_raw: i16_at(4),
            temp_c: i16_at(6) as f32 / 100.0,
        }),
        PID_QUATERNION => Some(ImuPacket::Quaternion {
            q0: i16_at(0) as f32 / 32768.0,
            q1: i16_at(2) as f32 / 32768.0,
            q2: i16_at(4) as f32 / 32768.0,
            q3: i16_at(6) as f32 / 32768.0,
        }),
        PID_PRESSURE_ALTITUDE => {
            let pressure_raw = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let altitude_raw = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            Some(ImuPacket::PressureAltitude {
                pressure_pa: pressure_raw as f32,
                altitude_m: altitude_raw as f32 / 100.0,
            })
        }
        PID_GPS_AUX => {
            let lon_raw = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let lat_raw = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
            Some(ImuPacket::GpsAux {
                lon: lon_raw as f64 / 1e7,
                lat: lat_raw as f64 / 1e7,
            })
        }
        _ => None,
    }
}

/// Try a candidate baud rate: open, wait up to `probe_window`, and declare
/// success only if at least one well-formed frame is received (§4.4).
pub(crate) async fn probe_baud<T>(port: &mut T, probe_window: Duration) -> bool
where
    T: tokio::io::AsyncRead + Unpin,
{
    let deadline = Instant::now() + probe_window;
    let mut buf = [0u8; 1];
    let mut scratch = Vec::new();
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, port.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => return false,
            Ok(Ok(_)) => {
                scratch.push(buf[0]);
                if scratch.len() > FRAME_LEN * 4 {
                    scratch.drain(0..FRAME_LEN);
                }
                if find_valid_frame(&scratch).is_some() {
                    return true;
                }
            }
            Ok(Err(_)) => return false,
        }
    }
    false
}

fn find_valid_frame(buf: &[u8]) -> Option<usize> {
    for start in 0..buf.len().saturating_sub(FRAME_LEN - 1) {
        if buf[start] != FRAME_HEADER {
            continue;
        }
        let candidate = &buf[start..start + FRAME_LEN];
        if checksum8(&candidate[..10]) == candidate[10] {
            return Some(start);
        }
    }
    None
}

/// Operator-requested command, delivered over the reader's `mpsc` channel
/// (§4.4: "`configure_imu(..)` is the only path that sends a
/// reconfiguration sequence", never at open time).
pub enum ImuCommand {
    Configure {
        body: Vec<u8>,
        reply: oneshot::Sender<std::io::Result<()>>,
    },
}

/// Run the IMU reader loop over an already-open transport, publishing
/// decoded packets into `snapshot`. Only sends anything on the wire when
/// `commands` delivers an explicit operator `Configure` request.
pub async fn run<T>(mut port: T, snapshot: watch::Sender<ImuSnapshot>, mut commands: mpsc::Receiver<ImuCommand>)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    info!("IMU reader started");
    let mut buf: Vec<u8> = Vec::with_capacity(FRAME_LEN * 4);
    let mut byte = [0u8; 1];
    let mut commands_closed = false;

    loop {
        tokio::select! {
            result = port.read(&mut byte) => {
                match result {
                    Ok(0) => {
                        warn!("IMU port closed (EOF)");
                        return;
                    }
                    Ok(_) => buf.push(byte[0]),
                    Err(e) => {
                        warn!("IMU read error: {e}");
                        return;
                    }
                }

                if buf.len() > FRAME_LEN * 4 {
                    let drop_n = buf.len() - FRAME_LEN * 2;
                    buf.drain(0..drop_n);
                }

                while let Some(start) = find_valid_frame(&buf) {
                    let frame = &buf[start..start + FRAME_LEN];
                    let pid = frame[1];
                    let mut data = [0u8; 8];
                    data.copy_from_slice(&frame[2..10]);
                    if let Some(packet) = decode_data(pid, data) {
                        debug!(pid, ?packet, "decoded IMU packet");
                        snapshot.send_modify(|s| s.apply(pid, packet));
                    }
                    buf.drain(0..start + FRAME_LEN);
                }
            }
            maybe_cmd = commands.recv(), if !commands_closed => {
                match maybe_cmd {
                    Some(ImuCommand::Configure { body, reply }) => {
                        info!("sending operator IMU configuration sequence");
                        let result = configure(&mut port, &body).await;
                        let _ = reply.send(result);
                    }
                    None => commands_closed = true,
                }
            }
        }
    }
}

/// Send an explicit operator-requested configuration sequence, bracketed
/// by unlock/lock as required by the firmware (§4.4). Never called at open
/// time.
async fn configure<T>(port: &mut T, body: &[u8]) -> std::io::Result<()>
where
    T: tokio::io::AsyncWrite + Unpin,
{
    port.write_all(&UNLOCK_SEQUENCE).await?;
    port.write_all(body).await?;
    port.write_all(&LOCK_SEQUENCE).await?;
    port.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(pid: u8, data: [u8; 8]) -> Vec<u8> {
        let mut frame = vec![FRAME_HEADER, pid];
        frame.extend_from_slice(&data);
        let sum = checksum8(&frame);
        frame.push(sum);
        frame
    }

    #[test]
    fn decodes_accel_packet_with_expected_scale() {
        let data = (i16::MAX).to_le_bytes();
        let mut full = [0u8; 8];
        full[0..2].copy_from_slice(&data);
        let packet = decode_data(PID_ACCEL, full).unwrap();
        match packet {
            ImuPacket::Accel { x_g, .. } => assert!((x_g - 16.0).abs() < 0.01),
            _ => panic!("expected Accel"),
        }
    }

    #[test]
    fn finds_frame_and_rejects_bad_checksum() {
        let mut frame = sample_frame(PID_EULER, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(find_valid_frame(&frame), Some(0));
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert_eq!(find_valid_frame(&frame), None);
    }

    #[tokio::test]
    async fn run_decodes_a_stream_of_frames_into_the_snapshot() {
        let mut stream = Vec::new();
        stream.extend(sample_frame(PID_ACCEL, [0, 0, 0, 0, 0, 0, 0, 0]));
        stream.extend(sample_frame(PID_GYRO, [0, 0, 0, 0, 0, 0, 0, 0]));

        let (core_side, mut sim_side) = tokio::io::duplex(256);
        let (tx, rx) = watch::channel(ImuSnapshot::default());
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        let reader = tokio::spawn(run(core_side, tx, cmd_rx));

        sim_side.write_all(&stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(sim_side);
        let _ = tokio::time::timeout(Duration::from_millis(200), reader).await;

        let snap = rx.borrow();
        assert!(snap.accel.is_some());
        assert!(snap.gyro.is_some());
    }

    #[tokio::test]
    async fn configure_sends_unlock_body_lock_in_order() {
        let (core_side, mut sim_side) = tokio::io::duplex(256);
        let (tx, _rx) = watch::channel(ImuSnapshot::default());
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let reader = tokio::spawn(run(core_side, tx, cmd_rx));

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(ImuCommand::Configure { body: vec![0xAB, 0xCD], reply: reply_tx })
            .await
            .unwrap();

        let mut seen = [0u8; 12];
        sim_side.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen[0..5], &UNLOCK_SEQUENCE);
        assert_eq!(&seen[5..7], &[0xAB, 0xCD]);
        assert_eq!(&seen[7..12], &LOCK_SEQUENCE);

        reply_rx.await.unwrap().unwrap();
        drop(cmd_tx);
        drop(sim_side);
        let _ = tokio::time::timeout(Duration::from_millis(200), reader).await;
    }
}
