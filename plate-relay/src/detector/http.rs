//! Detector backed by an external HTTP inference service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::trace;
use url::Url;

use super::{Detection, DetectionError, Detector};
use crate::source::Frame;

/// Response body expected from the inference endpoint.
#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

/// POSTs each frame (`Content-Type: image/jpeg`) to the configured endpoint
/// and reads back `{"detections": [{"label": "...", "confidence": 0.9}]}`.
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpDetector {
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DetectionError::Inference(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    fn parse_response(body: &[u8]) -> Result<Vec<Detection>, DetectionError> {
        let response: InferenceResponse = serde_json::from_slice(body)
            .map_err(|e| DetectionError::MalformedOutput(e.to_string()))?;

        for detection in &response.detections {
            if !(0.0..=1.0).contains(&detection.confidence) {
                return Err(DetectionError::MalformedOutput(format!(
                    "confidence {} for '{}' is outside [0, 1]",
                    detection.confidence, detection.label
                )));
            }
        }

        Ok(response.detections)
    }
}

#[async_trait]
impl Detector for HttpDetector {
    fn name(&self) -> &str {
        "http"
    }

    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectionError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[("camera_id", frame.channel_id())])
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(frame.data().clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DetectionError::Timeout
                } else {
                    DetectionError::Inference(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectionError::Inference(format!(
                "inference endpoint returned {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DetectionError::Inference(e.to_string()))?;
        let detections = Self::parse_response(&body)?;

        trace!(
            channel = frame.channel_id(),
            count = detections.len(),
            "Inference complete"
        );
        Ok(detections)
    }
}
