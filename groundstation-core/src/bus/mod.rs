//! Bus Arbiter (§4.2): serializes request/response transactions on the
//! shared half-duplex RS485 link.
//!
//! Generic over any `AsyncRead + AsyncWrite + Unpin + Send` transport, so
//! production code instantiates it over `tokio_serial::SerialStream` and
//! tests instantiate it over `tokio::io::duplex` halves — one task owns the
//! handle, everyone else talks through a channel, the same discipline the
//! UDP socket task in the positioning-hub reference uses.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use servo_proto::frame::{checksum_of, decode_response, REQUEST_HEADER};

/// How many bytes a transaction's response occupies on the wire.
#[derive(Debug, Clone, Copy)]
pub enum ResponseLen {
    /// The exact total frame length (header+addr+cmd+payload+checksum).
    Exact(usize),
    /// A bounded upper limit for variable-length replies; the arbiter reads
    /// up to this many bytes and lets the codec reject anything malformed.
    UpTo(usize),
}

struct Transaction {
    addr: u8,
    cmd: u8,
    payload: Vec<u8>,
    response_len: ResponseLen,
    timeout: Duration,
    reply_header: u8,
    reply: oneshot::Sender<Result<Vec<u8>, TransportError>>,
}

enum Submission {
    Normal(Transaction),
    Priority(Transaction),
}

/// Handle callers use to submit transactions to the arbiter's worker task.
#[derive(Clone)]
pub struct BusArbiter {
    tx: mpsc::Sender<Submission>,
}

impl BusArbiter {
    /// Spawn the worker task owning `transport` and return a cloneable
    /// handle plus the task's `JoinHandle` (awaited at shutdown).
    ///
    /// `min_inter_frame_gap` should be the configured bus's
    /// `effective_inter_frame_gap_ms()` (§4.2: "≥3.5 character times at the
    /// current baud, or 2ms, whichever is larger").
    pub fn spawn<T>(
        transport: T,
        reply_header: u8,
        min_inter_frame_gap: Duration,
    ) -> (Self, tokio::task::JoinHandle<()>)
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(worker_loop(transport, rx, reply_header, min_inter_frame_gap));
        (Self { tx }, handle)
    }

    /// Run a transaction to completion: serialize the request, wait for a
    /// matching response, and decode it. Never retries (§4.2).
    pub async fn transact(
        &self,
        addr: u8,
        cmd: u8,
        payload: Vec<u8>,
        response_len: ResponseLen,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.submit(addr, cmd, payload, response_len, timeout, false)
            .await
    }

    /// Emergency-stop transactions jump the FIFO queue (§5, "Emergency
    /// stop") but still wait for any in-flight transaction to finish.
    pub async fn transact_priority(
        &self,
        addr: u8,
        cmd: u8,
        payload: Vec<u8>,
        response_len: ResponseLen,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.submit(addr, cmd, payload, response_len, timeout, true)
            .await
    }

    async fn submit(
        &self,
        addr: u8,
        cmd: u8,
        payload: Vec<u8>,
        response_len: ResponseLen,
        timeout: Duration,
        priority: bool,
    ) -> Result<Vec<u8>, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let txn = Transaction {
            addr,
            cmd,
            payload,
            response_len,
            timeout,
            reply_header: REQUEST_HEADER,
            reply: reply_tx,
        };
        let submission = if priority {
            Submission::Priority(txn)
        } else {
            Submission::Normal(txn)
        };
        self.tx
            .send(submission)
            .await
            .map_err(|_| TransportError::LinkDown("arbiter worker has shut down".into()))?;
        reply_rx
            .await
            .map_err(|_| TransportError::LinkDown("arbiter worker dropped the reply".into()))?
    }
}

async fn worker_loop<T>(
    mut transport: T,
    mut rx: mpsc::Receiver<Submission>,
    reply_header: u8,
    min_inter_frame_gap: Duration,
)
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let mut normal: VecDeque<Transaction> = VecDeque::new();
    let mut priority: VecDeque<Transaction> = VecDeque::new();
    let mut last_response_at: Option<Instant> = None;

    loop {
        // Drain everything currently queued without blocking, so a burst of
        // submissions doesn't starve the priority lane behind a single
        // long-pending recv().
        while let Ok(submission) = rx.try_recv() {
            match submission {
                Submission::Priority(t) => priority.push_back(t),
                Submission::Normal(t) => normal.push_back(t),
            }
        }

        let txn = if let Some(t) = priority.pop_front() {
            t
        } else if let Some(t) = normal.pop_front() {
            t
        } else {
            match rx.recv().await {
                Some(Submission::Priority(t)) => t,
                Some(Submission::Normal(t)) => t,
                None => return, // all handles dropped
            }
        };

        if let Some(gap_start) = last_response_at {
            // Minimum inter-frame gap (§4.2 invariant); enforced here since
            // this worker is the sole writer on the wire.
            let elapsed = gap_start.elapsed();
            if elapsed < min_inter_frame_gap {
                tokio::time::sleep(min_inter_frame_gap - elapsed).await;
            }
        }

        let result = run_one(&mut transport, &txn, reply_header).await;
        last_response_at = Some(Instant::now());
        let _ = txn.reply.send(result);
    }
}

async fn run_one<T>(
    transport: &mut T,
    txn: &Transaction,
    reply_header: u8,
) -> Result<Vec<u8>, TransportError>
where
    T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    let mut request = Vec::with_capacity(3 + txn.payload.len() + 1);
    request.push(REQUEST_HEADER);
    request.push(txn.addr);
    request.push(txn.cmd);
    request.extend_from_slice(&txn.payload);
    request.push(checksum_of(&request));

    transport
        .write_all(&request)
        .await
        .map_err(|e| TransportError::LinkDown(e.to_string()))?;
    transport
        .flush()
        .await
        .map_err(|e| TransportError::LinkDown(e.to_string()))?;

    let read_result = tokio::time::timeout(txn.timeout, read_response(transport, txn.response_len)).await;

    let raw = match read_result {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            drain(transport).await;
            return Err(TransportError::LinkDown(e.to_string()));
        }
        Err(_) => {
            drain(transport).await;
            return Err(TransportError::Timeout);
        }
    };

    match decode_response(&raw, reply_header, txn.addr) {
        Ok(frame) => Ok(frame.payload),
        Err(servo_proto::CodecError::AddressMismatch { expected, got }) => {
            Err(TransportError::AddressMismatch { expected, got })
        }
        Err(e) => Err(TransportError::FrameError(e)),
    }
}

async fn read_response<T>(transport: &mut T, response_len: ResponseLen) -> std::io::Result<Vec<u8>>
where
    T: tokio::io::AsyncRead + Unpin,
{
    match response_len {
        ResponseLen::Exact(n) => {
            let mut buf = vec![0u8; n];
            transport.read_exact(&mut buf).await?;
            Ok(buf)
        }
        ResponseLen::UpTo(max) => {
            let mut buf = Vec::with_capacity(max);
            let mut byte = [0u8; 1];
            while buf.len() < max {
                let n = transport.read(&mut byte).await?;
                if n == 0 {
                    break;
                }
                buf.push(byte[0]);
            }
            Ok(buf)
        }
    }
}

/// Discard any late bytes up to a short silence period (§4.2: "when a
/// response times out, the bus is drained before the next transaction
/// begins").
async fn drain<T>(transport: &mut T)
where
    T: tokio::io::AsyncRead + Unpin,
{
    let mut byte = [0u8; 1];
    let quiet = Duration::from_millis(20);
    loop {
        match tokio::time::timeout(quiet, transport.read(&mut byte)).await {
            Ok(Ok(0)) | Err(_) => break,
            Ok(Ok(_)) => {
                trace!("drained stray byte after timeout");
                continue;
            }
            Ok(Err(e)) => {
                warn!("error while draining bus: {e}");
                break;
            }
        }
    }
    debug!("bus drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use servo_proto::Opcode;
    use tokio::io::duplex;

    /// Replies to every request with a well-formed frame carrying the echoed
    /// command and a fixed 2-byte payload.
    async fn fake_servo(mut half: tokio::io::DuplexStream, addr: u8) {
        let mut buf = [0u8; 64];
        loop {
            let n = match half.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            let req = &buf[..n];
            if req.len() < 4 {
                continue;
            }
            let cmd = req[2];
            let mut resp = vec![REQUEST_HEADER, addr, cmd, 0x01, 0x2C];
            let sum = checksum_of(&resp);
            resp.push(sum);
            if half.write_all(&resp).await.is_err() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn transact_round_trips_a_query() {
        let (core_side, sim_side) = duplex(256);
        tokio::spawn(fake_servo(sim_side, 1));
        let (arbiter, _handle) = BusArbiter::spawn(core_side, REQUEST_HEADER, Duration::from_millis(2));

        let payload = arbiter
            .transact(1, Opcode::Rpm.as_u8(), vec![], ResponseLen::Exact(6), Duration::from_millis(200))
            .await
            .unwrap();
        assert_eq!(payload, vec![0x01, 0x2C]);
    }

    #[tokio::test]
    async fn transact_times_out_against_a_silent_peer() {
        let (core_side, _sim_side) = duplex(256);
        // _sim_side is kept alive but never responds.
        let (arbiter, _handle) = BusArbiter::spawn(core_side, REQUEST_HEADER, Duration::from_millis(2));

        let err = arbiter
            .transact(1, Opcode::Rpm.as_u8(), vec![], ResponseLen::Exact(6), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
    }

    #[tokio::test]
    async fn two_concurrent_callers_are_serialized() {
        let (core_side, sim_side) = duplex(256);
        tokio::spawn(fake_servo(sim_side, 2));
        let (arbiter, _handle) = BusArbiter::spawn(core_side, REQUEST_HEADER, Duration::from_millis(2));

        let a = arbiter.clone();
        let b = arbiter.clone();
        let (ra, rb) = tokio::join!(
            a.transact(2, Opcode::Rpm.as_u8(), vec![], ResponseLen::Exact(6), Duration::from_millis(200)),
            b.transact(2, Opcode::Pulses.as_u8(), vec![], ResponseLen::Exact(6), Duration::from_millis(200)),
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
    }
}
