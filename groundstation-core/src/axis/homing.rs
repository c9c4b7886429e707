//! Homing strategies (§4.3.3): limit-switch and stall-based, both
//! finishing with `set_zero` so the encoder origin aligns with the
//! physical home position.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::bus::{BusArbiter, ResponseLen};
use crate::error::{AxisError, TransportError};
use servo_proto::status::{HomeStatus, StatusBundle};
use servo_proto::{numeric, Opcode};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const QUERY_TIMEOUT: Duration = Duration::from_millis(200);

async fn query_status(bus: &BusArbiter, addr: u8) -> Result<StatusBundle, AxisError> {
    let payload = bus
        .transact(
            addr,
            Opcode::StatusBundle.as_u8(),
            vec![],
            ResponseLen::Exact(3 + StatusBundle::PAYLOAD_LEN + 1),
            QUERY_TIMEOUT,
        )
        .await?;
    StatusBundle::decode(&payload).map_err(|e| AxisError::Transport(TransportError::FrameError(e)))
}

async fn execute_home(bus: &BusArbiter, addr: u8) -> Result<(), AxisError> {
    bus.transact(addr, Opcode::ExecuteHome.as_u8(), vec![], ResponseLen::Exact(5), QUERY_TIMEOUT)
        .await?;
    Ok(())
}

async fn set_zero(bus: &BusArbiter, addr: u8) -> Result<(), AxisError> {
    bus.transact(addr, Opcode::SetZero.as_u8(), vec![], ResponseLen::Exact(5), QUERY_TIMEOUT)
        .await?;
    Ok(())
}

/// Poll the home-status query until the servo reports success or failure,
/// or until `timeout` elapses (default 120s per §4.3.3).
async fn poll_until_done(bus: &BusArbiter, addr: u8, timeout: Duration) -> Result<(), AxisError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(AxisError::HomingTimeout {
                elapsed_s: timeout.as_secs_f64(),
            });
        }
        let payload = bus
            .transact(addr, Opcode::HomeStatus.as_u8(), vec![], ResponseLen::Exact(5), QUERY_TIMEOUT)
            .await?;
        let status = HomeStatus::try_from(*payload.first().unwrap_or(&0))
            .map_err(|e| AxisError::Transport(TransportError::FrameError(e)))?;
        match status {
            HomeStatus::Success => return Ok(()),
            HomeStatus::Failed => return Err(AxisError::Protocol),
            HomeStatus::InProgress => sleep(POLL_INTERVAL).await,
        }
    }
}

/// Limit-switch homing: trigger polarity/direction/seek speed are
/// configured ahead of time via the dedicated config opcode; this function
/// only issues the execute/poll/zero sequence.
pub async fn home_limit_switch(bus: &BusArbiter, addr: u8, timeout: Duration) -> Result<(), AxisError> {
    info!(addr, "starting limit-switch home");
    execute_home(bus, addr).await?;
    poll_until_done(bus, addr, timeout).await?;
    set_zero(bus, addr).await?;
    info!(addr, "limit-switch home complete");
    Ok(())
}

/// Stall-based homing: issue execute-home at reduced seek current (already
/// configured), wait for the stall flag, release the locked rotor, back off
/// `backoff_deg` at the axis's current microstep setting, then zero.
pub async fn home_stall(
    bus: &BusArbiter,
    addr: u8,
    backoff_deg: f64,
    microstep: u16,
    timeout: Duration,
) -> Result<(), AxisError> {
    info!(addr, "starting stall home");
    execute_home(bus, addr).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(AxisError::HomingTimeout {
                elapsed_s: timeout.as_secs_f64(),
            });
        }
        let status = query_status(bus, addr).await?;
        if status.stalled {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }

    warn!(addr, "stall detected during home, releasing locked rotor");
    bus.transact(
        addr,
        Opcode::ReleaseLockedRotor.as_u8(),
        vec![],
        ResponseLen::Exact(5),
        QUERY_TIMEOUT,
    )
    .await?;

    let backoff_pulses = numeric::angle_to_pulses(backoff_deg, microstep);
    let payload = numeric::encode_i32(backoff_pulses).to_vec();
    bus.transact(
        addr,
        Opcode::RelativePulse.as_u8(),
        payload,
        ResponseLen::Exact(5),
        QUERY_TIMEOUT,
    )
    .await?;

    set_zero(bus, addr).await?;
    info!(addr, "stall home complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_proto::frame::{checksum_of, REQUEST_HEADER};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// A servo double that answers ExecuteHome, then reports `InProgress`
    /// once before `Success` for HomeStatus queries, and acks everything
    /// else with an empty payload.
    async fn limit_switch_servo(mut half: tokio::io::DuplexStream, addr: u8) {
        let mut reported_in_progress = false;
        let mut buf = [0u8; 64];
        loop {
            let n = match half.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let req = &buf[..n];
            let cmd = req[2];
            let mut resp = vec![REQUEST_HEADER, addr, cmd];
            if cmd == Opcode::HomeStatus.as_u8() {
                if !reported_in_progress {
                    reported_in_progress = true;
                    resp.push(0); // InProgress
                } else {
                    resp.push(1); // Success
                }
            } else {
                resp.push(0);
            }
            let sum = checksum_of(&resp);
            resp.push(sum);
            if half.write_all(&resp).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn limit_switch_home_completes_after_polling() {
        let (core_side, sim_side) = tokio::io::duplex(256);
        tokio::spawn(limit_switch_servo(sim_side, 1));
        let (bus, _handle) = BusArbiter::spawn(core_side, REQUEST_HEADER, Duration::from_millis(2));

        home_limit_switch(&bus, 1, Duration::from_secs(5)).await.unwrap();
    }
}
