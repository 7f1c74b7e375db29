//! Frame acquisition from camera channels.
//!
//! The relay does not decode video itself. A [`FrameSource`] hands back one
//! encoded still image per call; how it gets it (DVR snapshot API, RTSP
//! grabber, test fixture) is up to the implementation.

mod hikvision;
mod simulated;

pub use hikvision::{HikvisionConfig, HikvisionSource};
pub use simulated::SimulatedSource;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// One captured still image from a channel.
#[derive(Debug, Clone)]
pub struct Frame {
    channel_id: u32,
    captured_at: DateTime<Utc>,
    data: Bytes,
}

impl Frame {
    pub fn new(channel_id: u32, captured_at: DateTime<Utc>, data: Bytes) -> Self {
        Self {
            channel_id,
            captured_at,
            data,
        }
    }

    /// Frame stamped with the current instant.
    pub fn captured_now(channel_id: u32, data: Bytes) -> Self {
        Self::new(channel_id, Utc::now(), data)
    }

    pub fn channel_id(&self) -> u32 {
        self.channel_id
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Encoded image bytes (JPEG for the bundled sources).
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Transient failure acquiring a frame for one channel.
///
/// These are never fatal at runtime: the scheduler logs them and skips the
/// channel for the current round.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    #[error("frame acquisition timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),
}

/// Capability that produces frames for a channel.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Capture one frame from `channel_id`.
    async fn acquire(&self, channel_id: u32) -> Result<Frame, FrameError>;

    /// Check the device is reachable. Called once at startup; a failure there
    /// stops the process.
    async fn check_reachable(&self) -> Result<(), FrameError> {
        Ok(())
    }
}

/// JPEG start-of-image marker.
pub(crate) fn looks_like_jpeg(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == 0xFF && data[1] == 0xD8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_marker() {
        assert!(looks_like_jpeg(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!looks_like_jpeg(b"<html>"));
        assert!(!looks_like_jpeg(&[0xFF]));
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::captured_now(4, Bytes::from_static(&[0xFF, 0xD8, 0x00]));
        assert_eq!(frame.channel_id(), 4);
        assert_eq!(frame.len(), 3);
        assert!(!frame.is_empty());
    }
}
