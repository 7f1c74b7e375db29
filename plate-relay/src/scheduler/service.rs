//! Round driver and worker supervision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::metrics::SchedulerMetrics;
use super::worker::{ChannelConfig, ChannelWorker};
use crate::detector::Detector;
use crate::publisher::EventPublisher;
use crate::source::FrameSource;

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Minimum time between round starts.
    pub interval: Duration,
    /// Bound on one frame acquisition.
    pub frame_timeout: Duration,
    /// Bound on one detection call.
    pub detect_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            frame_timeout: Duration::from_secs(5),
            detect_timeout: Duration::from_secs(5),
        }
    }
}

/// Drives polling rounds across all channels.
///
/// Every channel gets its own [`ChannelWorker`] task, so a slow or failing
/// channel only ever costs itself. A shared ticker publishes the round number
/// on a `watch` channel; workers that are still busy when it advances simply
/// see the latest round once they are free. A worker that panics is
/// respawned.
pub struct Scheduler {
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    publisher: EventPublisher,
    config: SchedulerConfig,
    metrics: Arc<SchedulerMetrics>,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        publisher: EventPublisher,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            detector,
            publisher,
            config,
            metrics: Arc::new(SchedulerMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn spawn_worker(
        &self,
        workers: &mut JoinSet<()>,
        channel: ChannelConfig,
        rounds: watch::Receiver<u64>,
        cancel: CancellationToken,
    ) -> Id {
        let worker = ChannelWorker::new(
            channel.clone(),
            self.source.clone(),
            self.detector.clone(),
            self.publisher.clone(),
            self.config.interval,
            self.config.frame_timeout,
            self.config.detect_timeout,
            self.metrics.channel(channel.channel_id),
        );
        workers.spawn(worker.run(rounds, cancel)).id()
    }

    /// Poll `channels` until `cancel` fires.
    pub async fn run(&self, channels: Vec<ChannelConfig>, cancel: CancellationToken) {
        let (round_tx, round_rx) = watch::channel(0u64);
        let mut workers = JoinSet::new();
        let mut assignments: HashMap<Id, ChannelConfig> = HashMap::new();

        for channel in channels {
            let id = self.spawn_worker(&mut workers, channel.clone(), round_rx.clone(), cancel.clone());
            assignments.insert(id, channel);
        }

        info!(
            channels = assignments.len(),
            interval_ms = self.config.interval.as_millis() as u64,
            source = self.source.name(),
            detector = self.detector.name(),
            "Scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut round = 0u64;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(joined) = workers.join_next_with_id() => {
                    let (task_id, panicked) = match joined {
                        Ok((task_id, ())) => (task_id, false),
                        Err(e) => {
                            if e.is_panic() {
                                (e.id(), true)
                            } else {
                                debug!(error = %e, "Worker task cancelled");
                                assignments.remove(&e.id());
                                continue;
                            }
                        }
                    };

                    let Some(channel) = assignments.remove(&task_id) else {
                        continue;
                    };

                    if panicked {
                        error!(channel = channel.channel_id, "Channel worker panicked, respawning");
                        self.metrics.record_restart();
                        let id = self.spawn_worker(
                            &mut workers,
                            channel.clone(),
                            round_tx.subscribe(),
                            cancel.clone(),
                        );
                        assignments.insert(id, channel);
                    } else {
                        warn!(channel = channel.channel_id, "Channel worker exited");
                    }
                }

                _ = ticker.tick() => {
                    round += 1;
                    self.metrics.record_round();
                    round_tx.send_replace(round);
                }
            }
        }

        info!("Scheduler stopping, waiting for channel workers");
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined
                && e.is_panic()
            {
                warn!(error = %e, "Channel worker panicked during shutdown");
            }
        }
        info!(rounds = round, "Scheduler stopped");
    }
}
