//! Per-channel polling scheduler.

mod metrics;
mod service;
mod worker;

pub use metrics::{
    ChannelMetrics, ChannelMetricsSnapshot, SchedulerMetrics, SchedulerMetricsSnapshot,
};
pub use service::{Scheduler, SchedulerConfig};
pub use worker::{ChannelConfig, ChannelError, ChannelWorker, PollSummary};
