//! Snapshot acquisition from a Hikvision DVR/NVR over its ISAPI HTTP interface.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

use super::{Frame, FrameError, FrameSource, looks_like_jpeg};

/// Connection settings for the recorder.
#[derive(Debug, Clone)]
pub struct HikvisionConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Per-request timeout enforced by the HTTP client.
    pub request_timeout: Duration,
}

/// Fetches one JPEG snapshot per call from
/// `/ISAPI/Streaming/channels/{channel}01/picture` (main stream of the channel).
pub struct HikvisionSource {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
}

impl HikvisionSource {
    pub fn new(config: HikvisionConfig) -> Result<Self, FrameError> {
        let base_url = Url::parse(&format!("http://{}:{}/", config.host, config.port))
            .map_err(|e| FrameError::Unavailable(format!("invalid recorder address: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| FrameError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            username: config.username,
            password: config.password,
        })
    }

    fn picture_url(&self, channel_id: u32) -> Result<Url, FrameError> {
        self.base_url
            .join(&format!("ISAPI/Streaming/channels/{channel_id}01/picture"))
            .map_err(|e| FrameError::Transport(e.to_string()))
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, FrameError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FrameError::Unavailable(
                format!("recorder rejected credentials ({})", response.status()),
            )),
            status => Err(FrameError::Transport(format!("unexpected status {status}"))),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FrameError {
    if e.is_timeout() {
        FrameError::Transport(format!("request timed out: {e}"))
    } else {
        FrameError::Transport(e.to_string())
    }
}

#[async_trait]
impl FrameSource for HikvisionSource {
    fn name(&self) -> &str {
        "hikvision"
    }

    async fn acquire(&self, channel_id: u32) -> Result<Frame, FrameError> {
        let url = self.picture_url(channel_id)?;
        let response = self.get(url).await?;
        let data = response.bytes().await.map_err(map_reqwest_error)?;

        if !looks_like_jpeg(&data) {
            return Err(FrameError::Malformed(format!(
                "channel {channel_id} returned {} bytes that are not a JPEG image",
                data.len()
            )));
        }

        debug!(channel = channel_id, bytes = data.len(), "Snapshot acquired");
        Ok(Frame::captured_now(channel_id, data))
    }

    async fn check_reachable(&self) -> Result<(), FrameError> {
        let url = self
            .base_url
            .join("ISAPI/System/deviceInfo")
            .map_err(|e| FrameError::Transport(e.to_string()))?;
        self.get(url).await?;
        info!(address = %self.base_url, "Recorder reachable");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> HikvisionSource {
        HikvisionSource::new(HikvisionConfig {
            host: "192.168.1.64".to_string(),
            port: 8080,
            username: "admin".to_string(),
            password: "secret".to_string(),
            request_timeout: Duration::from_secs(2),
        })
        .unwrap()
    }

    #[test]
    fn test_picture_url_uses_main_stream() {
        let url = source().picture_url(3).unwrap();
        assert_eq!(
            url.as_str(),
            "http://192.168.1.64:8080/ISAPI/Streaming/channels/301/picture"
        );
    }

    #[test]
    fn test_invalid_host_is_unavailable() {
        let result = HikvisionSource::new(HikvisionConfig {
            host: "not a host".to_string(),
            port: 80,
            username: String::new(),
            password: String::new(),
            request_timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(FrameError::Unavailable(_))));
    }
}
