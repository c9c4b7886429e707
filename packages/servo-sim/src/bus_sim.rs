//! RS485 bus simulator: a TCP listener standing in for the serial port
//! (`spec.md` §6 bench-simulator note — a PTY pair or TCP bridge, so the
//! core's `BusArbiter`/codec run unmodified). One connection at a time, the
//! same "single task owns the handle" discipline the core itself uses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use servo_proto::frame::{checksum_of, REQUEST_HEADER};

use crate::axis_sim::{build_response, SimAxis};
use crate::scenarios::ScenarioConfig;

pub struct AxisBank {
    axes: Mutex<HashMap<u8, SimAxis>>,
    scenarios: ScenarioConfig,
}

impl AxisBank {
    pub fn new(axes: Vec<SimAxis>, scenarios: ScenarioConfig) -> Arc<Self> {
        let axes = axes.into_iter().map(|a| (a.addr, a)).collect();
        Arc::new(Self {
            axes: Mutex::new(axes),
            scenarios,
        })
    }

    /// Drive the shared physics clock, independent of any connected bus
    /// client (a real servo keeps turning whether or not anyone is polling
    /// it).
    pub async fn run_physics(self: Arc<Self>, tick_rate_hz: f64) {
        let period = Duration::from_secs_f64(1.0 / tick_rate_hz);
        let mut interval = tokio::time::interval(period);
        let dt = period.as_secs_f64();
        loop {
            interval.tick().await;
            let mut axes = self.axes.lock().await;
            for axis in axes.values_mut() {
                axis.tick(dt, &self.scenarios);
            }
        }
    }

    async fn dispatch(&self, addr: u8, cmd: u8, payload: &[u8]) -> Option<Vec<u8>> {
        let mut axes = self.axes.lock().await;
        let axis = axes.get_mut(&addr)?;
        axis.handle_request(cmd, payload, &self.scenarios)
    }
}

/// Accept bus connections forever, serving one at a time (the real link is
/// half-duplex and single-master, so concurrent connections are not a
/// scenario this bench needs to model).
pub async fn serve(listen_addr: &str, bank: Arc<AxisBank>) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = listen_addr, "RS485 bus simulator listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "bus client connected");
        let bank = bank.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, bank).await {
                warn!("bus connection ended: {e}");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, bank: Arc<AxisBank>) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    loop {
        buf.clear();
        loop {
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Ok(());
            }
            if buf.is_empty() {
                if byte[0] != REQUEST_HEADER {
                    continue;
                }
            }
            buf.push(byte[0]);
            if buf.len() >= 3 {
                break;
            }
        }

        // buf = [header, addr, cmd]; payload length is opcode-dependent and
        // unknown to this layer, so keep reading until the last byte read
        // is a valid checksum of everything before it.
        loop {
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Ok(());
            }
            buf.push(byte[0]);
            if buf.len() >= 4 && checksum_of(&buf[..buf.len() - 1]) == buf[buf.len() - 1] {
                break;
            }
            if buf.len() > 256 {
                warn!("bus frame exceeded maximum length without a valid checksum, dropping");
                buf.clear();
                break;
            }
        }

        if buf.len() < 4 {
            continue;
        }

        let addr = buf[1];
        let cmd = buf[2];
        let payload = &buf[3..buf.len() - 1];
        debug!(addr, cmd, payload_len = payload.len(), "bus request");

        match bank.dispatch(addr, cmd, payload).await {
            Some(response_payload) => {
                let response = build_response(addr, cmd, response_payload);
                stream.write_all(&response).await?;
                stream.flush().await?;
            }
            None => {
                debug!(addr, cmd, "request dropped (no axis or timeout scenario)");
            }
        }
    }
}
