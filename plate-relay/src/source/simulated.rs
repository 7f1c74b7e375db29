//! Synthetic frame source for demos and tests without a recorder.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};

use super::{Frame, FrameError, FrameSource};

/// Produces tiny placeholder JPEG payloads, failing a configurable fraction
/// of acquisitions with a transport error.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    failure_rate: f64,
}

impl SimulatedSource {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[async_trait]
impl FrameSource for SimulatedSource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn acquire(&self, channel_id: u32) -> Result<Frame, FrameError> {
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(FrameError::Transport(format!(
                "simulated transport failure on channel {channel_id}"
            )));
        }

        let mut data = BytesMut::with_capacity(8);
        data.put_slice(&[0xFF, 0xD8]);
        data.put_u32(channel_id);
        data.put_slice(&[0xFF, 0xD9]);

        Ok(Frame::captured_now(channel_id, data.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::looks_like_jpeg;

    #[tokio::test]
    async fn test_never_fails_at_zero_rate() {
        let source = SimulatedSource::default();
        for channel in 1..=10 {
            let frame = source.acquire(channel).await.unwrap();
            assert_eq!(frame.channel_id(), channel);
            assert!(looks_like_jpeg(frame.data()));
        }
    }

    #[tokio::test]
    async fn test_always_fails_at_full_rate() {
        let source = SimulatedSource::new(1.0);
        assert!(matches!(
            source.acquire(2).await,
            Err(FrameError::Transport(_))
        ));
    }
}
