//! Frame distribution.
//!
//! The tick thread owns the [`FrameDistributor`]; network tasks only hold a
//! [`DistributorHandle`]. The two sides share:
//!
//! - a `watch` slot with the latest frame, replaced atomically every tick,
//! - an unbounded registration channel for new push subscribers,
//! - per subscriber, an unbounded message channel plus a byte counter of messages
//!   handed to it but not yet written to the socket.
//!
//! The counter is what keeps the unbounded channels bounded in practice: once a
//! subscriber is more than `backlog_frame_multiple` frames behind, it simply gets
//! nothing for that tick. The tick thread never waits on a subscriber.

use crate::telemetry::frame::{FrameEnvelope, TelemetryFrame};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    #[error("Frame serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Subscriber {id} is gone")]
    SubscriberWrite { id: u64 },

    #[error("Distributor is closed")]
    Closed,
}

/// Serialization hook for push messages. Called at most once per tick.
pub trait FrameEncoder: Send {
    fn encode(&mut self, envelope: &FrameEnvelope<'_>) -> Result<String, DistributorError>;
}

#[derive(Debug, Default)]
pub struct JsonFrameEncoder;

impl FrameEncoder for JsonFrameEncoder {
    fn encode(&mut self, envelope: &FrameEnvelope<'_>) -> Result<String, DistributorError> {
        Ok(serde_json::to_string(envelope)?)
    }
}

fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Arc<str>>,
    backlog: Arc<AtomicUsize>,
}

/// Receiving side of one push subscriber.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Arc<str>>,
    backlog: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next message, or `None` once the distributor has closed this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }

    /// Marks `len` bytes as written to the socket.
    pub fn complete(&self, len: usize) {
        let _ = self
            .backlog
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| Some(b.saturating_sub(len)));
    }

    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }
}

/// What one `publish` call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub encoded: bool,
    pub bytes: usize,
    pub delivered: usize,
    pub skipped: usize,
    pub dropped: usize,
}

/// Counters for the periodic statistics log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DistributorStats {
    pub published: u64,
    pub encoded: u64,
    pub delivered: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub encode_failures: u64,
}

pub struct FrameDistributor {
    latest: watch::Sender<Option<Arc<TelemetryFrame>>>,
    registrations: mpsc::UnboundedReceiver<Subscriber>,
    subscribers: Vec<Subscriber>,
    encoder: Box<dyn FrameEncoder>,
    batch: Arc<AtomicU64>,
    backlog_frame_multiple: usize,
    stats: DistributorStats,
}

impl FrameDistributor {
    pub fn new(encoder: Box<dyn FrameEncoder>, backlog_frame_multiple: usize) -> (Self, DistributorHandle) {
        let (latest_tx, latest_rx) = watch::channel(None);
        let (reg_tx, reg_rx) = mpsc::unbounded_channel();
        let batch = Arc::new(AtomicU64::new(0));

        let distributor = Self {
            latest: latest_tx,
            registrations: reg_rx,
            subscribers: Vec::new(),
            encoder,
            batch: batch.clone(),
            backlog_frame_multiple,
            stats: DistributorStats::default(),
        };
        let handle = DistributorHandle {
            latest: latest_rx,
            registrations: reg_tx,
            batch,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        (distributor, handle)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn stats(&self) -> DistributorStats {
        self.stats
    }

    fn accept_registrations(&mut self) {
        while let Ok(subscriber) = self.registrations.try_recv() {
            info!("Telemetry subscriber {} registered", subscriber.id);
            self.subscribers.push(subscriber);
        }
    }

    /// Updates the pull slot and pushes the frame to every subscriber that is not
    /// too far behind. Never blocks.
    pub fn publish(&mut self, frame: Arc<TelemetryFrame>) -> Result<PublishReport, DistributorError> {
        self.latest.send_replace(Some(frame.clone()));
        self.stats.published += 1;
        self.accept_registrations();

        let mut report = PublishReport::default();
        self.subscribers.retain(|s| !s.tx.is_closed());
        if self.subscribers.is_empty() {
            return Ok(report);
        }

        let batch_id = self.batch.fetch_add(1, Ordering::Relaxed) + 1;
        let frames = [frame.as_ref()];
        let envelope = FrameEnvelope::new(batch_id, unix_millis(), &frames);
        let message: Arc<str> = match self.encoder.encode(&envelope) {
            Ok(text) => text.into(),
            Err(e) => {
                self.stats.encode_failures += 1;
                return Err(e);
            }
        };
        report.encoded = true;
        report.bytes = message.len();
        self.stats.encoded += 1;

        let limit = self.backlog_frame_multiple.saturating_mul(message.len());
        self.subscribers.retain(|subscriber| {
            if subscriber.backlog.load(Ordering::Acquire) > limit {
                report.skipped += 1;
                return true;
            }
            subscriber.backlog.fetch_add(message.len(), Ordering::AcqRel);
            if subscriber.tx.send(message.clone()).is_err() {
                warn!("{}", DistributorError::SubscriberWrite { id: subscriber.id });
                report.dropped += 1;
                return false;
            }
            report.delivered += 1;
            true
        });

        self.stats.delivered += report.delivered as u64;
        self.stats.skipped += report.skipped as u64;
        self.stats.dropped += report.dropped as u64;
        if report.skipped > 0 {
            debug!("Frame {} skipped for {} slow subscriber(s)", frame.sequence, report.skipped);
        }
        Ok(report)
    }

    /// Disconnects every subscriber and refuses new ones. Idempotent.
    pub fn close_all(&mut self) {
        self.registrations.close();
        self.accept_registrations();
        if !self.subscribers.is_empty() {
            info!("Closing {} telemetry subscriber(s)", self.subscribers.len());
        }
        self.subscribers.clear();
    }
}

/// Network-side access to the distributor. Cheap to clone.
#[derive(Clone)]
pub struct DistributorHandle {
    latest: watch::Receiver<Option<Arc<TelemetryFrame>>>,
    registrations: mpsc::UnboundedSender<Subscriber>,
    batch: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl DistributorHandle {
    pub fn subscribe(&self) -> Result<Subscription, DistributorError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        self.registrations
            .send(Subscriber {
                id,
                tx,
                backlog: backlog.clone(),
            })
            .map_err(|_| DistributorError::Closed)?;
        Ok(Subscription { id, rx, backlog })
    }

    pub fn latest(&self) -> Option<Arc<TelemetryFrame>> {
        self.latest.borrow().clone()
    }

    /// A receiver that wakes on every published frame.
    pub fn watch(&self) -> watch::Receiver<Option<Arc<TelemetryFrame>>> {
        self.latest.clone()
    }

    /// Envelope with the latest frame (or none yet) for one pull request. Every
    /// call consumes a batch id.
    pub fn pull_json(&self) -> Result<String, DistributorError> {
        let latest = self.latest();
        let batch_id = self.batch.fetch_add(1, Ordering::Relaxed) + 1;
        let frames: Vec<&TelemetryFrame> = latest.as_deref().into_iter().collect();
        let envelope = FrameEnvelope::new(batch_id, unix_millis(), &frames);
        JsonFrameEncoder.encode(&envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counts encode calls so tests can see when serialization is skipped.
    struct CountingEncoder(Arc<AtomicUsize>);

    impl FrameEncoder for CountingEncoder {
        fn encode(&mut self, envelope: &FrameEnvelope<'_>) -> Result<String, DistributorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            JsonFrameEncoder.encode(envelope)
        }
    }

    struct FailingEncoder;

    impl FrameEncoder for FailingEncoder {
        fn encode(&mut self, _envelope: &FrameEnvelope<'_>) -> Result<String, DistributorError> {
            Err(serde_json::from_str::<u8>("not json").unwrap_err().into())
        }
    }

    fn frame(sequence: u64) -> Arc<TelemetryFrame> {
        Arc::new(TelemetryFrame {
            sequence,
            ..Default::default()
        })
    }

    #[test]
    fn zero_subscribers_skip_serialization_but_update_pull_slot() -> Result<(), Box<dyn std::error::Error>> {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut distributor, handle) = FrameDistributor::new(Box::new(CountingEncoder(calls.clone())), 4);

        for seq in 1..=5 {
            let report = distributor.publish(frame(seq))?;
            assert!(!report.encoded);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(handle.latest().map(|f| f.sequence), Some(5));
        Ok(())
    }

    #[test]
    fn serializes_once_per_tick_for_many_subscribers() -> Result<(), Box<dyn std::error::Error>> {
        let calls = Arc::new(AtomicUsize::new(0));
        let (mut distributor, handle) = FrameDistributor::new(Box::new(CountingEncoder(calls.clone())), 4);
        let mut subs = vec![handle.subscribe()?, handle.subscribe()?, handle.subscribe()?];

        let report = distributor.publish(frame(1))?;
        assert_eq!(report.delivered, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        for sub in subs.iter_mut() {
            let message = sub.try_recv().ok_or("no message")?;
            let value: serde_json::Value = serde_json::from_str(&message)?;
            assert_eq!(value["frames"][0]["sequence"], 1);
            assert_eq!(value["bridgeInfo"]["framesInBatch"], 1);
        }
        Ok(())
    }

    #[test]
    fn slow_subscriber_is_skipped_while_others_receive() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 4);
        let mut fast = handle.subscribe()?;
        let mut slow = handle.subscribe()?;

        let mut fast_seen = 0;
        for seq in 1..=10 {
            distributor.publish(frame(seq))?;
            while let Some(message) = fast.try_recv() {
                fast.complete(message.len());
                fast_seen += 1;
            }
        }
        assert_eq!(fast_seen, 10);
        assert_eq!(fast.backlog(), 0);

        // Sent while its backlog was 0, 1, 2, 3 and 4 frames; skipped from then on.
        let mut slow_seen = Vec::new();
        while let Some(message) = slow.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&message)?;
            slow_seen.push(value["frames"][0]["sequence"].as_u64().ok_or("no sequence")?);
        }
        assert_eq!(slow_seen, vec![1, 2, 3, 4, 5]);
        assert!(distributor.stats().skipped >= 5);
        assert_eq!(handle.latest().map(|f| f.sequence), Some(10));
        Ok(())
    }

    #[test]
    fn caught_up_subscriber_receives_newest_frame_not_backlog() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 1);
        let mut sub = handle.subscribe()?;

        for seq in 1..=5 {
            distributor.publish(frame(seq))?;
        }
        let mut seen = Vec::new();
        while let Some(message) = sub.try_recv() {
            sub.complete(message.len());
            let value: serde_json::Value = serde_json::from_str(&message)?;
            seen.push(value["frames"][0]["sequence"].as_u64().ok_or("no sequence")?);
        }
        assert_eq!(seen, vec![1, 2]);

        distributor.publish(frame(6))?;
        let message = sub.try_recv().ok_or("no message")?;
        let value: serde_json::Value = serde_json::from_str(&message)?;
        assert_eq!(value["frames"][0]["sequence"], 6);
        Ok(())
    }

    #[test]
    fn dropped_subscription_is_removed() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 4);
        let keep = handle.subscribe()?;
        let gone = handle.subscribe()?;
        distributor.publish(frame(1))?;
        assert_eq!(distributor.subscriber_count(), 2);

        drop(gone);
        let report = distributor.publish(frame(2))?;
        assert_eq!(report.delivered, 1);
        assert_eq!(distributor.subscriber_count(), 1);
        drop(keep);
        Ok(())
    }

    #[test]
    fn encode_failure_still_updates_pull_slot() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(FailingEncoder), 4);
        let _sub = handle.subscribe()?;
        let result = distributor.publish(frame(3));
        assert!(matches!(result, Err(DistributorError::Serialization(_))));
        assert_eq!(handle.latest().map(|f| f.sequence), Some(3));
        assert_eq!(distributor.stats().encode_failures, 1);
        Ok(())
    }

    #[test]
    fn pull_and_push_share_one_batch_counter() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 4);

        let empty: serde_json::Value = serde_json::from_str(&handle.pull_json()?)?;
        assert_eq!(empty["bridgeInfo"]["batchId"], 1);
        assert_eq!(empty["bridgeInfo"]["framesInBatch"], 0);

        let mut sub = handle.subscribe()?;
        distributor.publish(frame(1))?;
        let pushed: serde_json::Value = serde_json::from_str(&sub.try_recv().ok_or("no message")?)?;
        assert_eq!(pushed["bridgeInfo"]["batchId"], 2);

        let pulled: serde_json::Value = serde_json::from_str(&handle.pull_json()?)?;
        assert_eq!(pulled["bridgeInfo"]["batchId"], 3);
        assert_eq!(pulled["frames"][0]["sequence"], 1);
        Ok(())
    }

    #[test]
    fn close_all_ends_subscriptions_and_refuses_new_ones() -> Result<(), Box<dyn std::error::Error>> {
        let (mut distributor, handle) = FrameDistributor::new(Box::new(JsonFrameEncoder), 4);
        let mut sub = handle.subscribe()?;
        distributor.publish(frame(1))?;
        distributor.close_all();
        distributor.close_all();

        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
        assert!(matches!(handle.subscribe(), Err(DistributorError::Closed)));
        Ok(())
    }
}
