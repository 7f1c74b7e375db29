//! Threshold filter, bounded queue and dispatcher between producers and the hub.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use plate_event::DetectionEvent;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::debounce::Debouncer;
use crate::detector::Detection;
use crate::hub::{BroadcastHub, ListenerId};

/// Default minimum confidence forwarded to listeners.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Publisher tuning.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Only detections with `confidence > threshold` are forwarded.
    pub threshold: f64,
    pub queue_capacity: usize,
    /// Repeat suppression window per `(camera_id, plate)`; zero disables.
    pub debounce_window: Duration,
    /// How long shutdown keeps dispatching queued events.
    pub drain_timeout: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            queue_capacity: 256,
            debounce_window: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to a detection handed to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Accepted into the dispatch queue.
    Queued,
    /// Confidence at or under the threshold; silently discarded.
    BelowThreshold,
    /// Could not form a valid event (empty label, confidence out of range).
    Invalid,
    /// Queue full; the new event was dropped.
    QueueFull,
    /// Dispatcher has shut down.
    Closed,
}

impl PublishOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued)
    }
}

#[derive(Debug, Default)]
struct PublisherStats {
    queued: AtomicU64,
    below_threshold: AtomicU64,
    invalid: AtomicU64,
    dropped_queue_full: AtomicU64,
    debounced: AtomicU64,
    dispatched: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time publisher counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PublisherStatsSnapshot {
    pub queued: u64,
    pub below_threshold: u64,
    pub invalid: u64,
    pub dropped_queue_full: u64,
    pub debounced: u64,
    pub dispatched: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
struct QueuedEvent {
    event: DetectionEvent,
    origin: Option<ListenerId>,
}

/// Producer side. Cheap to clone; never blocks the caller.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: mpsc::Sender<QueuedEvent>,
    threshold: f64,
    stats: Arc<PublisherStats>,
}

impl EventPublisher {
    /// Create the publisher and its not-yet-running dispatcher.
    pub fn channel(config: PublisherConfig) -> (Self, Dispatcher) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let stats = Arc::new(PublisherStats::default());

        let publisher = Self {
            sender,
            threshold: config.threshold,
            stats: stats.clone(),
        };
        let dispatcher = Dispatcher {
            receiver,
            debouncer: Debouncer::new(config.debounce_window),
            drain_timeout: config.drain_timeout,
            stats,
        };
        (publisher, dispatcher)
    }

    /// Create the publisher and spawn its dispatcher onto `hub`.
    ///
    /// Cancelling `cancel` stops intake and drains the queue; the returned
    /// handle completes once draining is done.
    pub fn spawn(
        hub: Arc<BroadcastHub>,
        config: PublisherConfig,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (publisher, dispatcher) = Self::channel(config);
        let handle = tokio::spawn(dispatcher.run(hub, cancel));
        (publisher, handle)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Publish a detection stamped with the current instant.
    pub fn publish(&self, detection: &Detection, source_id: u32) -> PublishOutcome {
        self.publish_at(detection, source_id, Utc::now())
    }

    /// Publish a detection stamped with `timestamp` (normally the frame's
    /// capture time).
    pub fn publish_at(
        &self,
        detection: &Detection,
        source_id: u32,
        timestamp: DateTime<Utc>,
    ) -> PublishOutcome {
        if detection.confidence <= self.threshold {
            self.stats.below_threshold.fetch_add(1, Ordering::Relaxed);
            trace!(
                channel = source_id,
                plate = %detection.label,
                confidence = detection.confidence,
                "Below threshold"
            );
            return PublishOutcome::BelowThreshold;
        }

        match DetectionEvent::new(
            timestamp,
            source_id,
            detection.label.clone(),
            detection.confidence,
        ) {
            Ok(event) => self.enqueue(QueuedEvent {
                event,
                origin: None,
            }),
            Err(e) => {
                self.stats.invalid.fetch_add(1, Ordering::Relaxed);
                warn!(channel = source_id, error = %e, "Discarding invalid detection");
                PublishOutcome::Invalid
            }
        }
    }

    /// Forward an event received from listener `origin` to every other
    /// listener.
    pub fn relay(&self, event: DetectionEvent, origin: ListenerId) -> PublishOutcome {
        if event.confidence() <= self.threshold {
            self.stats.below_threshold.fetch_add(1, Ordering::Relaxed);
            return PublishOutcome::BelowThreshold;
        }
        self.enqueue(QueuedEvent {
            event,
            origin: Some(origin),
        })
    }

    fn enqueue(&self, queued: QueuedEvent) -> PublishOutcome {
        match self.sender.try_send(queued) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
                PublishOutcome::Queued
            }
            Err(mpsc::error::TrySendError::Full(queued)) => {
                self.stats.dropped_queue_full.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = %queued.event,
                    capacity = self.sender.max_capacity(),
                    "Publish queue full, dropping event"
                );
                PublishOutcome::QueueFull
            }
            Err(mpsc::error::TrySendError::Closed(queued)) => {
                debug!(event = %queued.event, "Publisher closed, dropping event");
                PublishOutcome::Closed
            }
        }
    }

    pub fn stats(&self) -> PublisherStatsSnapshot {
        let s = &self.stats;
        PublisherStatsSnapshot {
            queued: s.queued.load(Ordering::Relaxed),
            below_threshold: s.below_threshold.load(Ordering::Relaxed),
            invalid: s.invalid.load(Ordering::Relaxed),
            dropped_queue_full: s.dropped_queue_full.load(Ordering::Relaxed),
            debounced: s.debounced.load(Ordering::Relaxed),
            dispatched: s.dispatched.load(Ordering::Relaxed),
            abandoned: s.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Consumer side: the single task that hands events to the hub, in queue
/// order.
pub struct Dispatcher {
    receiver: mpsc::Receiver<QueuedEvent>,
    debouncer: Debouncer,
    drain_timeout: Duration,
    stats: Arc<PublisherStats>,
}

impl Dispatcher {
    pub async fn run(mut self, hub: Arc<BroadcastHub>, cancel: CancellationToken) {
        debug!("Publisher dispatcher started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                queued = self.receiver.recv() => match queued {
                    Some(queued) => self.dispatch(&hub, queued).await,
                    None => {
                        debug!("All publishers dropped, dispatcher exiting");
                        return;
                    }
                },
            }
        }

        self.drain(&hub).await;
    }

    async fn dispatch(&mut self, hub: &BroadcastHub, queued: QueuedEvent) {
        let QueuedEvent { event, origin } = queued;

        if !self
            .debouncer
            .should_emit(event.source_id(), event.label(), Instant::now())
        {
            self.stats.debounced.fetch_add(1, Ordering::Relaxed);
            trace!(event = %event, "Debounced");
            return;
        }

        let report = hub.publish_except(&event, origin).await;
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        debug!(
            event = %event,
            delivered = report.delivered,
            evicted = report.evicted,
            "Event dispatched"
        );
    }

    async fn drain(&mut self, hub: &BroadcastHub) {
        self.receiver.close();
        let pending = self.receiver.len();
        if pending == 0 {
            debug!("Publisher stopped with empty queue");
            return;
        }

        info!(pending, "Draining publish queue");
        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        let mut drained = 0usize;

        loop {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(queued)) => {
                    self.dispatch(hub, queued).await;
                    drained += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let abandoned = self.receiver.len();
                    self.stats
                        .abandoned
                        .fetch_add(abandoned as u64, Ordering::Relaxed);
                    warn!(drained, abandoned, "Drain timed out, abandoning queued events");
                    return;
                }
            }
        }

        info!(drained, "Publish queue drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ListenerConnection;
    use uuid::Uuid;

    fn no_debounce() -> PublisherConfig {
        PublisherConfig {
            debounce_window: Duration::ZERO,
            ..Default::default()
        }
    }

    async fn next_event(conn: &mut ListenerConnection) -> DetectionEvent {
        let payload = tokio::time::timeout(Duration::from_secs(1), conn.recv())
            .await
            .unwrap()
            .unwrap();
        DetectionEvent::from_json(payload.as_str()).unwrap()
    }

    #[tokio::test]
    async fn test_below_threshold_never_forwarded() {
        let hub = Arc::new(BroadcastHub::default());
        let mut conn = hub.register();
        let cancel = CancellationToken::new();
        let (publisher, task) = EventPublisher::spawn(hub.clone(), no_debounce(), cancel.clone());

        assert_eq!(
            publisher.publish(&Detection::new("LOW0001", 0.49), 1),
            PublishOutcome::BelowThreshold
        );
        assert_eq!(
            publisher.publish(&Detection::new("LOW0002", 0.0), 1),
            PublishOutcome::BelowThreshold
        );
        assert_eq!(
            publisher.publish(&Detection::new("EDGE050", 0.5), 1),
            PublishOutcome::BelowThreshold
        );
        assert_eq!(
            publisher.publish(&Detection::new("HIGH051", 0.51), 1),
            PublishOutcome::Queued
        );

        let event = next_event(&mut conn).await;
        assert_eq!(event.label(), "HIGH051");

        let relayed_edge = DetectionEvent::now(2, "EDGE050", 0.5).unwrap();
        assert_eq!(
            publisher.relay(relayed_edge, Uuid::new_v4()),
            PublishOutcome::BelowThreshold
        );

        cancel.cancel();
        task.await.unwrap();
        assert!(conn.try_recv().is_none());
        assert_eq!(publisher.stats().below_threshold, 4);
        assert_eq!(hub.stats().published, 1);
    }

    #[tokio::test]
    async fn test_invalid_detection() {
        let (publisher, _dispatcher) = EventPublisher::channel(no_debounce());
        assert_eq!(
            publisher.publish(&Detection::new("  ", 0.9), 1),
            PublishOutcome::Invalid
        );
        assert_eq!(
            publisher.publish(&Detection::new("ABC1234", 1.5), 1),
            PublishOutcome::Invalid
        );
        assert_eq!(publisher.stats().invalid, 2);
    }

    #[tokio::test]
    async fn test_queue_full_drops_newest() {
        let (publisher, _dispatcher) = EventPublisher::channel(PublisherConfig {
            queue_capacity: 2,
            ..no_debounce()
        });
        let detection = Detection::new("ABC1234", 0.9);

        assert!(publisher.publish(&detection, 1).is_queued());
        assert!(publisher.publish(&detection, 2).is_queued());
        assert_eq!(publisher.publish(&detection, 3), PublishOutcome::QueueFull);

        let stats = publisher.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped_queue_full, 1);
    }

    #[tokio::test]
    async fn test_closed_after_dispatcher_gone() {
        let (publisher, dispatcher) = EventPublisher::channel(no_debounce());
        drop(dispatcher);
        assert_eq!(
            publisher.publish(&Detection::new("ABC1234", 0.9), 1),
            PublishOutcome::Closed
        );
    }

    #[tokio::test]
    async fn test_order_preserved() {
        let hub = Arc::new(BroadcastHub::default());
        let mut conn = hub.register();
        let cancel = CancellationToken::new();
        let (publisher, _task) = EventPublisher::spawn(hub, no_debounce(), cancel);

        for i in 0..20 {
            let outcome = publisher.publish(&Detection::new(format!("SEQ{i:04}"), 0.9), 1);
            assert!(outcome.is_queued());
        }
        for i in 0..20 {
            assert_eq!(next_event(&mut conn).await.label(), format!("SEQ{i:04}"));
        }
    }

    #[tokio::test]
    async fn test_debounce_suppresses_repeats() {
        let hub = Arc::new(BroadcastHub::default());
        let mut conn = hub.register();
        let cancel = CancellationToken::new();
        let (publisher, task) = EventPublisher::spawn(
            hub,
            PublisherConfig {
                debounce_window: Duration::from_secs(60),
                ..Default::default()
            },
            cancel.clone(),
        );

        publisher.publish(&Detection::new("ABC1234", 0.9), 1);
        publisher.publish(&Detection::new("ABC1234", 0.95), 1);
        publisher.publish(&Detection::new("ABC1234", 0.9), 2);

        cancel.cancel();
        task.await.unwrap();

        let first = DetectionEvent::from_json(conn.try_recv().unwrap().as_str()).unwrap();
        let second = DetectionEvent::from_json(conn.try_recv().unwrap().as_str()).unwrap();
        assert!(conn.try_recv().is_none());
        assert_eq!((first.source_id(), first.confidence()), (1, 0.9));
        assert_eq!(second.source_id(), 2);
        assert_eq!(publisher.stats().debounced, 1);
    }

    #[tokio::test]
    async fn test_publish_at_keeps_capture_time() {
        let hub = Arc::new(BroadcastHub::default());
        let mut conn = hub.register();
        let (publisher, _task) =
            EventPublisher::spawn(hub, no_debounce(), CancellationToken::new());

        let captured = DateTime::parse_from_rfc3339("2026-03-04T05:06:07.250Z")
            .unwrap()
            .with_timezone(&Utc);
        publisher.publish_at(&Detection::new("ABC1234", 0.9), 4, captured);

        assert_eq!(next_event(&mut conn).await.timestamp(), captured);
    }

    #[tokio::test]
    async fn test_relay_skips_origin() {
        let hub = Arc::new(BroadcastHub::default());
        let mut origin = hub.register();
        let mut other = hub.register();
        let (publisher, _task) =
            EventPublisher::spawn(hub, no_debounce(), CancellationToken::new());

        let event = DetectionEvent::now(3, "GHI3456", 0.88).unwrap();
        assert!(publisher.relay(event, origin.id()).is_queued());

        let received = next_event(&mut other).await;
        assert_eq!(received.label(), "GHI3456");
        assert_eq!(received.source_id(), 3);
        assert!(origin.try_recv().is_none());

        let weak = DetectionEvent::now(3, "GHI3456", 0.2).unwrap();
        assert_eq!(
            publisher.relay(weak, origin.id()),
            PublishOutcome::BelowThreshold
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let hub = Arc::new(BroadcastHub::default());
        let mut conn = hub.register();
        let (publisher, dispatcher) = EventPublisher::channel(no_debounce());

        for i in 0..5 {
            publisher.publish(&Detection::new(format!("DRN{i:04}"), 0.9), 1);
        }

        let cancel = CancellationToken::new();
        cancel.cancel();
        dispatcher.run(hub, cancel).await;

        for i in 0..5 {
            let payload = conn.try_recv().unwrap();
            assert!(payload.as_str().contains(&format!("DRN{i:04}")));
        }
        assert_eq!(
            publisher.publish(&Detection::new("LATE001", 0.9), 1),
            PublishOutcome::Closed
        );
        assert_eq!(publisher.stats().abandoned, 0);
    }
}
