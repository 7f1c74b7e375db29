//! Detection event model shared by the relay service and its listeners.
//!
//! A [`DetectionEvent`] is the canonical record of one recognised plate on one
//! camera channel. On the wire it is a UTF-8 JSON object:
//!
//! ```text
//! { "timestamp": "2026-01-01T12:00:00.000Z", "plate": "ABC1234", "camera_id": 1, "confidence": 0.92 }
//! ```

pub mod error;
pub mod event;
pub mod timestamp;

pub use error::{EventError, Result};
pub use event::DetectionEvent;
