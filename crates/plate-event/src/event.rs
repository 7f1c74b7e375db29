//! The canonical detection event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EventError, Result};
use crate::timestamp;

/// One above-threshold plate recognition on one camera channel.
///
/// Events are immutable once built and carry no identity beyond their fields.
/// The confidence is always finite and within `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent")]
pub struct DetectionEvent {
    #[serde(with = "timestamp")]
    timestamp: DateTime<Utc>,
    #[serde(rename = "plate")]
    label: String,
    #[serde(rename = "camera_id")]
    source_id: u32,
    confidence: f64,
}

/// Unvalidated shape of an inbound message.
#[derive(Deserialize)]
struct WireEvent {
    #[serde(deserialize_with = "timestamp::deserialize")]
    timestamp: DateTime<Utc>,
    plate: String,
    camera_id: u32,
    confidence: f64,
}

impl TryFrom<WireEvent> for DetectionEvent {
    type Error = EventError;

    fn try_from(wire: WireEvent) -> Result<Self> {
        Self::new(wire.timestamp, wire.camera_id, wire.plate, wire.confidence)
    }
}

impl DetectionEvent {
    /// Build an event, validating the confidence range and the label.
    pub fn new(
        timestamp: DateTime<Utc>,
        source_id: u32,
        label: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(EventError::InvalidConfidence(confidence));
        }

        let label = label.into();
        if label.trim().is_empty() {
            return Err(EventError::EmptyLabel);
        }

        Ok(Self {
            timestamp,
            label,
            source_id,
            confidence,
        })
    }

    /// Build an event stamped with the current instant.
    pub fn now(source_id: u32, label: impl Into<String>, confidence: f64) -> Result<Self> {
        Self::new(Utc::now(), source_id, label, confidence)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Camera channel the event originated from.
    pub fn source_id(&self) -> u32 {
        self.source_id
    }

    /// Recognised plate text.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Encode the event as a wire text frame.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(EventError::Serialization)
    }

    /// Decode and validate a wire text frame.
    ///
    /// Any message that is not valid JSON of the expected shape, or that
    /// violates an event invariant, is reported as [`EventError::Malformed`].
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(EventError::Malformed)
    }
}

impl std::fmt::Display for DetectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} on camera {} ({:.2}) at {}",
            self.label,
            self.source_id,
            self.confidence,
            timestamp::format(&self.timestamp)
        )
    }
}
