//! Listener registry and fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use plate_event::DetectionEvent;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connection::{ListenerConnection, ListenerId, ListenerState, StateCell};
use super::handle::{DEFAULT_OUTBOUND_CAPACITY, DEFAULT_SEND_TIMEOUT, DeliveryError, OutboundHandle};

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Outbound queue capacity per listener.
    pub outbound_capacity: usize,
    /// How long a publish waits on one full listener before evicting it.
    pub send_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

struct ListenerEntry {
    handle: OutboundHandle,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl ListenerEntry {
    /// Move to `target` and wake the session. A listener whose session already
    /// dropped its connection is Closed and stays that way.
    fn release(&self, id: ListenerId, target: ListenerState) {
        if let Err(e) = self.state.transition(target) {
            debug!(listener = %id, error = %e, "Listener already released");
        }
        self.cancel.cancel();
    }
}

/// Result of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Listeners present when iteration began.
    pub targets: usize,
    pub delivered: usize,
    pub evicted: usize,
}

#[derive(Debug, Default)]
struct HubStats {
    registered: AtomicU64,
    published: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
    dropped_no_listeners: AtomicU64,
}

/// Point-in-time hub counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HubStatsSnapshot {
    pub listeners: usize,
    pub registered: u64,
    pub published: u64,
    pub delivered: u64,
    pub evicted: u64,
    pub dropped_no_listeners: u64,
    /// Fullest outbound queue among current listeners, 0.0 to 1.0.
    pub max_queue_usage: f64,
}

/// Owns the set of Open listeners and fans events out to them.
///
/// The registry lock is only held to change membership or to snapshot the
/// outbound handles; sends happen outside it, concurrently, each bounded by
/// [`HubConfig::send_timeout`]. Publishing to a listener only enqueues on its
/// own bounded queue, so a stalled socket never holds up anyone else.
pub struct BroadcastHub {
    config: HubConfig,
    registry: RwLock<HashMap<ListenerId, ListenerEntry>>,
    /// Set by [`close_all`](Self::close_all); only read or written under the
    /// registry write lock.
    closed: AtomicBool,
    stats: HubStats,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
            stats: HubStats::default(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Add a fresh Open listener.
    ///
    /// After [`close_all`](Self::close_all) the listener is never inserted: it
    /// comes back already Closing with its token cancelled, so the session
    /// closes the socket straight away.
    pub fn register(&self) -> ListenerConnection {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let state = Arc::new(StateCell::new(ListenerState::Connecting));
        let cancel = CancellationToken::new();

        if let Err(e) = state.transition(ListenerState::Open) {
            // Unreachable for a freshly created cell
            error!(listener = %id, error = %e, "Failed to open listener");
        }

        let entry = ListenerEntry {
            handle: OutboundHandle::new(tx),
            state: state.clone(),
            cancel: cancel.clone(),
        };
        let admitted = {
            let mut registry = self.registry.write();
            if self.closed.load(Ordering::Acquire) {
                Err(entry)
            } else {
                registry.insert(id, entry);
                Ok(registry.len())
            }
        };
        let count = match admitted {
            Ok(count) => count,
            Err(entry) => {
                entry.release(id, ListenerState::Closing);
                info!(listener = %id, "Hub closed, rejecting listener");
                return ListenerConnection::new(id, rx, state, cancel);
            }
        };
        self.stats.registered.fetch_add(1, Ordering::Relaxed);

        info!(listener = %id, listeners = count, "Listener registered");
        ListenerConnection::new(id, rx, state, cancel)
    }

    /// Graceful removal: `Open -> Closing`. Idempotent; returns whether the
    /// listener was still registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let Some(entry) = self.registry.write().remove(&id) else {
            return false;
        };
        entry.release(id, ListenerState::Closing);
        info!(listener = %id, "Listener unregistered");
        true
    }

    /// Abrupt removal after a delivery failure or lost socket: `Open -> Closed`.
    /// Idempotent; returns whether the listener was still registered.
    pub fn evict(&self, id: ListenerId) -> bool {
        let Some(entry) = self.registry.write().remove(&id) else {
            return false;
        };
        entry.release(id, ListenerState::Closed);
        self.stats.evicted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Deliver `event` to every listener registered when iteration begins.
    pub async fn publish(&self, event: &DetectionEvent) -> DeliveryReport {
        self.publish_except(event, None).await
    }

    /// Like [`publish`](Self::publish), skipping `origin`.
    pub async fn publish_except(
        &self,
        event: &DetectionEvent,
        origin: Option<ListenerId>,
    ) -> DeliveryReport {
        let payload: Utf8Bytes = match event.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                error!(error = %e, "Failed to serialize event, dropping");
                return DeliveryReport::default();
            }
        };
        self.stats.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(ListenerId, OutboundHandle)> = {
            let registry = self.registry.read();
            registry
                .iter()
                .filter(|(id, _)| Some(**id) != origin)
                .map(|(id, entry)| (*id, entry.handle.clone()))
                .collect()
        };

        if targets.is_empty() {
            self.stats
                .dropped_no_listeners
                .fetch_add(1, Ordering::Relaxed);
            debug!(event = %event, "No listeners, event dropped");
            return DeliveryReport::default();
        }

        let timeout = self.config.send_timeout;
        let results = join_all(targets.iter().map(|(id, handle)| {
            let payload = payload.clone();
            async move { (*id, handle.send_with_timeout(payload, timeout).await) }
        }))
        .await;

        let mut report = DeliveryReport {
            targets: targets.len(),
            ..Default::default()
        };
        for (id, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    match e {
                        DeliveryError::Closed => {
                            debug!(listener = %id, "Listener gone, evicting")
                        }
                        DeliveryError::Timeout(_) => {
                            warn!(listener = %id, error = %e, "Slow listener, evicting")
                        }
                    }
                    if self.evict(id) {
                        report.evicted += 1;
                    }
                }
            }
        }

        self.stats
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        report
    }

    /// Shutdown: move every Open listener to Closing and signal its session to
    /// close the socket. Listeners registering afterwards are closed on
    /// arrival. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let drained: Vec<(ListenerId, ListenerEntry)> = {
            let mut registry = self.registry.write();
            self.closed.store(true, Ordering::Release);
            registry.drain().collect()
        };
        for (id, entry) in &drained {
            entry.release(*id, ListenerState::Closing);
        }
        if !drained.is_empty() {
            info!(listeners = drained.len(), "Closed all listeners");
        }
        drained.len()
    }

    /// Whether [`close_all`](Self::close_all) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.registry.read().len()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.registry.read().contains_key(&id)
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        let (listeners, max_queue_usage) = {
            let registry = self.registry.read();
            let usage = registry
                .values()
                .map(|entry| entry.handle.queue_usage())
                .fold(0.0, f64::max);
            (registry.len(), usage)
        };
        HubStatsSnapshot {
            listeners,
            registered: self.stats.registered.load(Ordering::Relaxed),
            published: self.stats.published.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            evicted: self.stats.evicted.load(Ordering::Relaxed),
            dropped_no_listeners: self.stats.dropped_no_listeners.load(Ordering::Relaxed),
            max_queue_usage,
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}
