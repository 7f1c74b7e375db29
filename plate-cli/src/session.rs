//! Relay connection lifecycle with explicit reconnect states.
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Disconnected
//!                     |                     ^
//!                     +---------------------+  (connect failed)
//! ```
//!
//! Every reconnect is a brand-new registration on the relay. Events published
//! while the session was down are not replayed.

use std::fmt;
use std::time::Duration;

use futures::StreamExt;
use plate_event::DetectionEvent;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{Result, SessionError};

pub type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }

    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting) | (Connecting, Open | Disconnected) | (Open, Disconnected)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives decoded events from a listening session.
pub trait EventHandler {
    fn on_event(&mut self, event: &DetectionEvent) -> Result<()>;
}

/// One client's connection to the relay, reconnecting according to a
/// [`BackoffPolicy`].
#[derive(Debug)]
pub struct ListenerSession {
    url: String,
    policy: BackoffPolicy,
    state: SessionState,
    /// Consecutive reconnect attempts since the session was last open.
    attempt: u32,
}

impl ListenerSession {
    pub fn new(url: impl Into<String>, policy: BackoffPolicy) -> Self {
        Self {
            url: url.into(),
            policy,
            state: SessionState::Disconnected,
            attempt: 0,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn transition(&mut self, target: SessionState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            return Err(SessionError::InvalidStateTransition {
                from: self.state,
                to: target,
            });
        }
        debug!(from = %self.state, to = %target, "Session state changed");
        self.state = target;
        Ok(())
    }

    /// Connect, retrying per the backoff policy until a connection opens.
    ///
    /// Returns `None` when `cancel` fires first.
    pub async fn open(&mut self, cancel: &CancellationToken) -> Result<Option<RelayStream>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            self.transition(SessionState::Connecting)?;
            info!(url = %self.url, attempt = self.attempt, "Connecting to relay");

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.transition(SessionState::Disconnected)?;
                    return Ok(None);
                }
                result = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())) => result,
            };

            match result {
                Ok(Ok((stream, _))) => {
                    self.transition(SessionState::Open)?;
                    self.attempt = 0;
                    info!(url = %self.url, "Connected to relay");
                    return Ok(Some(stream));
                }
                Ok(Err(e)) => warn!(url = %self.url, error = %e, "Connection failed"),
                Err(_) => warn!(url = %self.url, timeout = ?CONNECT_TIMEOUT, "Connection timed out"),
            }

            self.transition(SessionState::Disconnected)?;
            if !self.wait_before_retry(cancel).await? {
                return Ok(None);
            }
        }
    }

    /// Record the loss of an open connection and wait out the backoff.
    ///
    /// Returns `false` when `cancel` fires during the wait.
    pub async fn lost(&mut self, reason: &str, cancel: &CancellationToken) -> Result<bool> {
        self.transition(SessionState::Disconnected)?;
        warn!(url = %self.url, reason, "Connection to relay lost");
        self.wait_before_retry(cancel).await
    }

    /// Close an open connection without reconnecting.
    pub async fn close(&mut self, stream: &mut RelayStream) -> Result<()> {
        if let Err(e) = stream.close(None).await {
            debug!(error = %e, "Close handshake failed");
        }
        self.transition(SessionState::Disconnected)
    }

    async fn wait_before_retry(&mut self, cancel: &CancellationToken) -> Result<bool> {
        if !self.policy.should_retry(self.attempt) {
            return Err(SessionError::MaxAttemptsExceeded {
                attempts: self.attempt,
            });
        }

        let delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt += 1;
        info!(delay = ?delay, attempt = self.attempt, "Reconnecting after backoff");

        tokio::select! {
            _ = cancel.cancelled() => Ok(false),
            _ = tokio::time::sleep(delay) => Ok(true),
        }
    }

    /// Receive events until cancelled, handing each to `handler`.
    ///
    /// Malformed messages are logged and skipped. A lost connection is
    /// re-established according to the backoff policy.
    pub async fn listen<H>(&mut self, handler: &mut H, cancel: CancellationToken) -> Result<()>
    where
        H: EventHandler,
    {
        loop {
            let Some(mut stream) = self.open(&cancel).await? else {
                return Ok(());
            };

            let reason = loop {
                let message = tokio::select! {
                    _ = cancel.cancelled() => {
                        self.close(&mut stream).await?;
                        return Ok(());
                    }
                    message = stream.next() => message,
                };

                match message {
                    Some(Ok(Message::Text(text))) => match DetectionEvent::from_json(text.as_str()) {
                        Ok(event) => handler.on_event(&event)?,
                        Err(e) => warn!(error = %e, "Skipping malformed message"),
                    },
                    Some(Ok(Message::Binary(data))) => {
                        warn!(len = data.len(), "Skipping binary message");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break match frame {
                            Some(frame) => format!(
                                "closed by relay ({}: {})",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ),
                            None => "closed by relay".to_string(),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };

            if !self.lost(&reason, &cancel).await? {
                return Ok(());
            }
        }
    }
}
