//! Per-channel polling worker.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::metrics::ChannelMetrics;
use crate::detector::{DetectionError, Detector};
use crate::publisher::EventPublisher;
use crate::source::{FrameError, FrameSource};

/// Per-channel polling settings, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub channel_id: u32,
    pub poll_interval: Duration,
}

impl ChannelConfig {
    pub fn new(channel_id: u32, poll_interval: Duration) -> Self {
        Self {
            channel_id,
            poll_interval,
        }
    }
}

/// Transient fault on one channel for one round.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Detection(#[from] DetectionError),
}

/// Result of one successful poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub detections: usize,
    pub published: usize,
}

/// Polls one channel whenever the shared round counter advances.
pub struct ChannelWorker {
    config: ChannelConfig,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    publisher: EventPublisher,
    frame_timeout: Duration,
    detect_timeout: Duration,
    /// Rounds between polls, from the channel's own interval.
    stride: u64,
    metrics: Arc<ChannelMetrics>,
}

impl ChannelWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ChannelConfig,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        publisher: EventPublisher,
        round_interval: Duration,
        frame_timeout: Duration,
        detect_timeout: Duration,
        metrics: Arc<ChannelMetrics>,
    ) -> Self {
        let stride = rounds_per_poll(config.poll_interval, round_interval);
        Self {
            config,
            source,
            detector,
            publisher,
            frame_timeout,
            detect_timeout,
            stride,
            metrics,
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.config.channel_id
    }

    /// Acquire one frame, run detection and hand results to the publisher.
    pub async fn poll_once(&self) -> Result<PollSummary, ChannelError> {
        let channel_id = self.config.channel_id;

        let frame = tokio::time::timeout(self.frame_timeout, self.source.acquire(channel_id))
            .await
            .map_err(|_| FrameError::Timeout(self.frame_timeout))??;

        let detections = tokio::time::timeout(self.detect_timeout, self.detector.detect(&frame))
            .await
            .map_err(|_| DetectionError::Timeout)??;

        let published = detections
            .iter()
            .filter(|d| {
                self.publisher
                    .publish_at(d, channel_id, frame.captured_at())
                    .is_queued()
            })
            .count();

        trace!(
            channel = channel_id,
            bytes = frame.len(),
            detections = detections.len(),
            published,
            "Channel polled"
        );

        Ok(PollSummary {
            detections: detections.len(),
            published,
        })
    }

    /// Run until cancelled, polling at most once per round.
    pub async fn run(self, mut rounds: watch::Receiver<u64>, cancel: CancellationToken) {
        let channel_id = self.config.channel_id;
        let mut last_seen = *rounds.borrow_and_update();
        let mut next_due = 0u64;

        debug!(channel = channel_id, stride = self.stride, "Channel worker started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                changed = rounds.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let round = *rounds.borrow_and_update();
            let skipped = round.saturating_sub(last_seen + 1);
            if skipped > 0 {
                debug!(channel = channel_id, skipped, "Worker busy, rounds coalesced");
                self.metrics.record_coalesced(skipped);
            }
            last_seen = round;

            if round < next_due {
                continue;
            }
            next_due = round + self.stride;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                result = self.poll_once() => match result {
                    Ok(summary) => {
                        self.metrics.record_success(summary.detections, summary.published);
                    }
                    Err(e) => {
                        warn!(channel = channel_id, error = %e, "Channel poll failed, skipping round");
                        self.metrics.record_failure(&e);
                    }
                },
            }
        }

        debug!(channel = channel_id, "Channel worker stopped");
    }
}

/// Number of scheduler rounds between polls of a channel, at least one.
fn rounds_per_poll(poll_interval: Duration, round_interval: Duration) -> u64 {
    let round_ms = round_interval.as_millis().max(1);
    let stride = poll_interval.as_millis().div_ceil(round_ms);
    u64::try_from(stride).unwrap_or(u64::MAX).max(1)
}
