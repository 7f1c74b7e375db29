//! Event publisher: turns raw detections into [`plate_event::DetectionEvent`]s
//! and hands them to the hub without ever blocking the producer.

mod debounce;
mod service;

pub use debounce::Debouncer;
pub use service::{
    DEFAULT_CONFIDENCE_THRESHOLD, Dispatcher, EventPublisher, PublishOutcome, PublisherConfig,
    PublisherStatsSnapshot,
};
