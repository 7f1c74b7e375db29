//! Random detector used with the simulated frame source.

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;

use super::{Detection, DetectionError, Detector};
use crate::source::Frame;

const PLATES: &[&str] = &["ABC1234", "XYZ5678", "DEF9012", "GHI3456", "JKL7890"];

/// Emits at most one plate per frame, with a confidence anywhere in
/// `[0.3, 0.99]` so both sides of the default threshold are exercised.
#[derive(Debug, Clone)]
pub struct SimulatedDetector {
    hit_rate: f64,
}

impl SimulatedDetector {
    /// `hit_rate` is the probability that a frame contains a plate.
    pub fn new(hit_rate: f64) -> Self {
        Self {
            hit_rate: hit_rate.clamp(0.0, 1.0),
        }
    }

    fn sample(&self) -> Vec<Detection> {
        let mut rng = rand::rng();
        if !rng.random_bool(self.hit_rate) {
            return Vec::new();
        }

        let plate = PLATES.choose(&mut rng).copied().unwrap_or(PLATES[0]);
        let confidence: f64 = rng.random_range(0.3..=0.99);
        vec![Detection::new(plate, (confidence * 100.0).round() / 100.0)]
    }
}

impl Default for SimulatedDetector {
    fn default() -> Self {
        Self::new(0.3)
    }
}

#[async_trait]
impl Detector for SimulatedDetector {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        Ok(self.sample())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_never_detects_at_zero_rate() {
        let detector = SimulatedDetector::new(0.0);
        let frame = Frame::captured_now(1, Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]));
        for _ in 0..20 {
            assert!(detector.detect(&frame).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_always_detects_known_plate_in_range() {
        let detector = SimulatedDetector::new(1.0);
        let frame = Frame::captured_now(1, Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]));
        for _ in 0..50 {
            let detections = detector.detect(&frame).await.unwrap();
            assert_eq!(detections.len(), 1);
            let detection = &detections[0];
            assert!(PLATES.contains(&detection.label.as_str()));
            assert!((0.3..=0.99).contains(&detection.confidence));
        }
    }
}
