//! Plate detection over captured frames.
//!
//! The recognition model is an external capability. The relay only relies on
//! the [`Detector`] contract: take a frame, return zero or more
//! `(label, confidence)` pairs, possibly slowly, possibly failing.

mod http;
mod simulated;

pub use http::HttpDetector;
pub use simulated::SimulatedDetector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::Frame;

/// Raw detector output for one plate candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f64,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Transient failure running detection on one frame.
#[derive(Debug, Clone, Error)]
pub enum DetectionError {
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("detection timed out")]
    Timeout,

    #[error("malformed detector output: {0}")]
    MalformedOutput(String),
}

/// Recognises plates within a frame.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError>;
}
