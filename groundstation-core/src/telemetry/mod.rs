//! Telemetry Broadcaster (§4.5): fixed-rate snapshot assembly and
//! multi-subscriber fan-out with per-subscriber backpressure.
//!
//! Neither `tokio::sync::broadcast` (drops a message for *every* lagging
//! receiver, not just the slow one) nor `tokio::sync::mpsc` (no way to
//! evict a queued item from the sender side) satisfies "slow consumers
//! cannot stall others" with drop-oldest semantics, so subscriptions use a
//! small dedicated primitive instead: a bounded `VecDeque` behind a
//! `Mutex`, paired with a `Notify` so `recv()` can wait without polling.
//! The `Mutex` is held only across a push/pop, never across an `.await`,
//! which keeps the broadcaster's tick non-blocking.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::axis::state::AxisObservation;
use crate::error::Health;
use servo_proto::AxisTag;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub axes: Vec<(AxisTag, Health)>,
    pub imu: Health,
    pub gnss: Health,
}

/// One immutable, timestamped, sequence-numbered bundle of all observable
/// core state (§3, "Telemetry snapshot"). Constructed once, delivered,
/// discarded — never mutated after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub timestamp_unix_ms: u64,
    pub axes: Vec<(AxisTag, AxisObservation)>,
    pub imu_heading_deg: Option<f64>,
    pub gnss_lat_deg: Option<f64>,
    pub gnss_lon_deg: Option<f64>,
    pub health: HealthReport,
}

struct SubscriptionInner {
    queue: Mutex<VecDeque<Snapshot>>,
    notify: Notify,
    depth: usize,
}

/// A single subscriber's receive half. `recv()` drains the queue in order
/// and waits on `Notify` when it is empty.
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

impl Subscription {
    pub async fn recv(&self) -> Snapshot {
        loop {
            {
                let mut q = self.inner.queue.lock().unwrap();
                if let Some(snap) = q.pop_front() {
                    return snap;
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

struct SubscriberSlot {
    inner: Arc<SubscriptionInner>,
}

/// Fixed-rate telemetry assembly and fan-out. Holds watch receivers for
/// every axis and the sensor reader; owns nothing that requires exclusive
/// access, since it only ever reads (§3, "Ownership").
pub struct TelemetryBroadcaster {
    subscribers: Mutex<Vec<SubscriberSlot>>,
    sequence: AtomicU64,
    depth: usize,
}

impl TelemetryBroadcaster {
    pub fn new(depth: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
            depth,
        })
    }

    /// Register a new subscriber. Per §4.5's invariant, a subscriber only
    /// ever receives snapshots published after it subscribes.
    pub fn subscribe(&self) -> Subscription {
        let inner = Arc::new(SubscriptionInner {
            queue: Mutex::new(VecDeque::with_capacity(self.depth)),
            notify: Notify::new(),
            depth: self.depth,
        });
        self.subscribers.lock().unwrap().push(SubscriberSlot { inner: inner.clone() });
        Subscription { inner }
    }

    /// Publish to every subscriber alive at this instant. Drops the oldest
    /// undelivered snapshot for any subscriber whose queue is full — never
    /// blocks, never retries, never touches another subscriber's queue.
    fn publish(&self, snapshot: Snapshot) {
        // Drop subscribers whose receive half has been dropped (idempotent
        // "unsubscribe": nothing special to do beyond letting the Arc die).
        let mut subs = self.subscribers.lock().unwrap();
        subs.retain(|s| Arc::strong_count(&s.inner) > 1);

        for sub in subs.iter() {
            let mut q = sub.inner.queue.lock().unwrap();
            if q.len() >= sub.inner.depth {
                q.pop_front();
            }
            q.push_back(snapshot.clone());
            drop(q);
            sub.inner.notify.notify_one();
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// Compose one snapshot from the axes' and sensor reader's current state.
/// Pure — no I/O, no locking beyond the caller-supplied watch borrows.
pub fn compose_snapshot(
    sequence: u64,
    timestamp_unix_ms: u64,
    axes: Vec<(AxisTag, AxisObservation, Health)>,
    imu_heading_deg: Option<f64>,
    gnss: Option<(f64, f64)>,
    imu_health: Health,
    gnss_health: Health,
) -> Snapshot {
    let axis_health: Vec<(AxisTag, Health)> = axes.iter().map(|(tag, _, h)| (*tag, *h)).collect();
    Snapshot {
        sequence,
        timestamp_unix_ms,
        axes: axes.into_iter().map(|(tag, obs, _)| (tag, obs)).collect(),
        imu_heading_deg,
        gnss_lat_deg: gnss.map(|(lat, _)| lat),
        gnss_lon_deg: gnss.map(|(_, lon)| lon),
        health: HealthReport {
            axes: axis_health,
            imu: imu_health,
            gnss: gnss_health,
        },
    }
}

/// Derive per-axis health from response freshness (§4.5, "data-freshness
/// thresholds"): unresponsive beyond `axis_unresponsive_s` is a fault; a
/// fresh response but no in-flight fault is ok; anything in between (or a
/// latched fault) is degraded/fault respectively.
pub fn axis_health(observation: &AxisObservation, axis_unresponsive_s: f64) -> Health {
    if observation.last_fault.is_some() {
        Health::Fault
    } else if observation.last_response_age_s > axis_unresponsive_s {
        Health::Fault
    } else if observation.last_response_age_s > axis_unresponsive_s / 2.0 {
        Health::Degraded
    } else {
        Health::Ok
    }
}

/// Run the fixed-rate tick loop until `shutdown` fires. `collect` is called
/// once per tick to gather the current axis/sensor state; kept as a
/// callback so this loop stays agnostic of how many axes exist.
pub async fn run<F>(
    broadcaster: Arc<TelemetryBroadcaster>,
    rate_hz: f64,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
    mut collect: F,
) where
    F: FnMut() -> Snapshot + Send,
{
    let period = Duration::from_secs_f64(1.0 / rate_hz);
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = collect();
                debug!(sequence = snapshot.sequence, "publishing telemetry snapshot");
                broadcaster.publish(snapshot);
            }
            _ = shutdown.recv() => {
                warn!("telemetry broadcaster shutting down");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_snapshot(sequence: u64) -> Snapshot {
        Snapshot {
            sequence,
            timestamp_unix_ms: 0,
            axes: vec![],
            imu_heading_deg: None,
            gnss_lat_deg: None,
            gnss_lon_deg: None,
            health: HealthReport {
                axes: vec![],
                imu: Health::Ok,
                gnss: Health::Ok,
            },
        }
    }

    #[tokio::test]
    async fn subscribers_receive_snapshots_in_sequence_order() {
        let broadcaster = TelemetryBroadcaster::new(16);
        let sub = broadcaster.subscribe();

        broadcaster.publish(dummy_snapshot(0));
        broadcaster.publish(dummy_snapshot(1));
        broadcaster.publish(dummy_snapshot(2));

        assert_eq!(sub.recv().await.sequence, 0);
        assert_eq!(sub.recv().await.sequence, 1);
        assert_eq!(sub.recv().await.sequence, 2);
    }

    #[tokio::test]
    async fn slow_subscriber_drops_oldest_and_catches_up_to_latest() {
        let broadcaster = TelemetryBroadcaster::new(4);
        let sub = broadcaster.subscribe();

        for seq in 0..10 {
            broadcaster.publish(dummy_snapshot(seq));
        }

        // Depth 4, 10 published: the queue should hold only the last 4.
        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(sub.recv().await.sequence);
        }
        assert_eq!(received, vec![6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn active_subscriber_unaffected_by_a_blocked_one() {
        let broadcaster = TelemetryBroadcaster::new(4);
        let blocked = broadcaster.subscribe();
        let active = broadcaster.subscribe();

        for seq in 0..20 {
            broadcaster.publish(dummy_snapshot(seq));
            // active drains every tick, blocked never does.
            assert_eq!(active.recv().await.sequence, seq);
        }

        let mut blocked_received = Vec::new();
        for _ in 0..4 {
            blocked_received.push(blocked.recv().await.sequence);
        }
        assert_eq!(blocked_received, vec![16, 17, 18, 19]);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_does_not_affect_other_subscribers() {
        let broadcaster = TelemetryBroadcaster::new(4);
        let doomed = broadcaster.subscribe();
        let survivor = broadcaster.subscribe();
        drop(doomed);

        broadcaster.publish(dummy_snapshot(0));
        assert_eq!(survivor.recv().await.sequence, 0);
    }
}
