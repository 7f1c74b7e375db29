//! Sending half of a listener's bounded outbound queue.

use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Default outbound queue capacity per listener.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Default time a publish waits for room in a full outbound queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Delivery to one listener failed. The listener is evicted; nothing else is
/// affected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The session has gone away and dropped its receiver.
    #[error("listener connection is closed")]
    Closed,

    /// The outbound queue stayed full for the whole timeout.
    #[error("listener outbound queue full for {0:?}")]
    Timeout(Duration),
}

/// Backpressure-aware handle to one listener's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    sender: mpsc::Sender<Utf8Bytes>,
    max_capacity: usize,
}

impl OutboundHandle {
    pub fn new(sender: mpsc::Sender<Utf8Bytes>) -> Self {
        let max_capacity = sender.max_capacity();
        Self {
            sender,
            max_capacity,
        }
    }

    /// Enqueue a payload, waiting at most `timeout` when the queue is full.
    pub async fn send_with_timeout(
        &self,
        payload: Utf8Bytes,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        // Fast path: room in the queue
        match self.sender.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(payload)) => {
                // Slow path: wait for a permit
                match tokio::time::timeout(timeout, self.sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(payload);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(DeliveryError::Closed),
                    Err(_) => Err(DeliveryError::Timeout(timeout)),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue usage from 0.0 (empty) to 1.0 (full).
    pub fn queue_usage(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        1.0 - (self.sender.capacity() as f64 / self.max_capacity as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fast_path() {
        let (tx, mut rx) = mpsc::channel(2);
        let handle = OutboundHandle::new(tx);

        handle
            .send_with_timeout(Utf8Bytes::from_static("a"), DEFAULT_SEND_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(handle.queue_usage(), 0.5);
        assert_eq!(rx.recv().await.unwrap().as_str(), "a");
    }

    #[tokio::test]
    async fn test_full_queue_times_out() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = OutboundHandle::new(tx);
        let timeout = Duration::from_millis(20);

        handle
            .send_with_timeout(Utf8Bytes::from_static("a"), timeout)
            .await
            .unwrap();
        let err = handle
            .send_with_timeout(Utf8Bytes::from_static("b"), timeout)
            .await
            .unwrap_err();
        assert_eq!(err, DeliveryError::Timeout(timeout));
    }

    #[tokio::test]
    async fn test_full_queue_waits_for_room() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = OutboundHandle::new(tx);

        handle
            .send_with_timeout(Utf8Bytes::from_static("a"), DEFAULT_SEND_TIMEOUT)
            .await
            .unwrap();

        let reader = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            (first, second)
        });

        handle
            .send_with_timeout(Utf8Bytes::from_static("b"), DEFAULT_SEND_TIMEOUT)
            .await
            .unwrap();
        let (first, second) = reader.await.unwrap();
        assert_eq!(first.as_str(), "a");
        assert_eq!(second.as_str(), "b");
    }

    #[tokio::test]
    async fn test_closed_receiver() {
        let (tx, rx) = mpsc::channel(1);
        let handle = OutboundHandle::new(tx);
        drop(rx);

        assert!(handle.is_closed());
        assert_eq!(
            handle
                .send_with_timeout(Utf8Bytes::from_static("a"), DEFAULT_SEND_TIMEOUT)
                .await,
            Err(DeliveryError::Closed)
        );
    }
}
