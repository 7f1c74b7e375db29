//! Scheduler and per-channel counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use super::worker::ChannelError;

/// Counters for one channel.
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    polls: AtomicU64,
    frame_failures: AtomicU64,
    detection_failures: AtomicU64,
    detections: AtomicU64,
    published: AtomicU64,
    coalesced_rounds: AtomicU64,
    last_poll: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl ChannelMetrics {
    pub fn record_success(&self, detections: usize, published: usize) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        self.detections
            .fetch_add(detections as u64, Ordering::Relaxed);
        self.published.fetch_add(published as u64, Ordering::Relaxed);
        *self.last_poll.write() = Some(Utc::now());
    }

    pub fn record_failure(&self, error: &ChannelError) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        match error {
            ChannelError::Frame(_) => self.frame_failures.fetch_add(1, Ordering::Relaxed),
            ChannelError::Detection(_) => self.detection_failures.fetch_add(1, Ordering::Relaxed),
        };
        *self.last_poll.write() = Some(Utc::now());
        *self.last_error.write() = Some(error.to_string());
    }

    pub fn record_coalesced(&self, rounds: u64) {
        self.coalesced_rounds.fetch_add(rounds, Ordering::Relaxed);
    }

    pub fn polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.frame_failures.load(Ordering::Relaxed)
            + self.detection_failures.load(Ordering::Relaxed)
    }

    pub fn detections(&self) -> u64 {
        self.detections.load(Ordering::Relaxed)
    }

    fn snapshot(&self, channel_id: u32) -> ChannelMetricsSnapshot {
        ChannelMetricsSnapshot {
            channel_id,
            polls: self.polls.load(Ordering::Relaxed),
            frame_failures: self.frame_failures.load(Ordering::Relaxed),
            detection_failures: self.detection_failures.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            coalesced_rounds: self.coalesced_rounds.load(Ordering::Relaxed),
            last_poll: *self.last_poll.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Scheduler-wide counters plus a registry of per-channel metrics.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    rounds: AtomicU64,
    worker_restarts: AtomicU64,
    channels: RwLock<HashMap<u32, Arc<ChannelMetrics>>>,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for `channel_id`, created on first use.
    pub fn channel(&self, channel_id: u32) -> Arc<ChannelMetrics> {
        if let Some(metrics) = self.channels.read().get(&channel_id) {
            return metrics.clone();
        }
        self.channels
            .write()
            .entry(channel_id)
            .or_default()
            .clone()
    }

    pub fn record_round(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.worker_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn worker_restarts(&self) -> u64 {
        self.worker_restarts.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        let mut channels: Vec<ChannelMetricsSnapshot> = self
            .channels
            .read()
            .iter()
            .map(|(id, metrics)| metrics.snapshot(*id))
            .collect();
        channels.sort_by_key(|c| c.channel_id);

        SchedulerMetricsSnapshot {
            rounds: self.rounds(),
            worker_restarts: self.worker_restarts(),
            channels,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelMetricsSnapshot {
    pub channel_id: u32,
    pub polls: u64,
    pub frame_failures: u64,
    pub detection_failures: u64,
    pub detections: u64,
    pub published: u64,
    pub coalesced_rounds: u64,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub rounds: u64,
    pub worker_restarts: u64,
    pub channels: Vec<ChannelMetricsSnapshot>,
}
