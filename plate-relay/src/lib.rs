//! plate-relay library crate.
//!
//! Polls camera channels for frames, runs plate detection on them and fans the
//! resulting [`plate_event::DetectionEvent`]s out to WebSocket listeners.
//!
//! ```text
//! Scheduler -> FrameSource -> Detector -> EventPublisher -> BroadcastHub -> listeners
//! ```

pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod hub;
pub mod logging;
pub mod panic_hook;
pub mod publisher;
pub mod scheduler;
pub mod services;
pub mod source;

pub use error::{Error, Result};
