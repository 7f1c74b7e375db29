//! Listener connection and its lifecycle state.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::Error;

/// Opaque identifier assigned at registration.
pub type ListenerId = Uuid;

/// Lifecycle of one listener connection.
///
/// `Connecting -> Open -> Closing -> Closed` for a graceful close,
/// `Open -> Closed` on error or abrupt disconnect. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListenerState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ListenerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Open => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: ListenerState) -> bool {
        use ListenerState::*;

        matches!(
            (self, target),
            (Connecting, Open | Closed) | (Open, Closing | Closed) | (Closing, Closed)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: ListenerState) -> Result<ListenerState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Listener state shared between the hub's registry entry and the session
/// that owns the [`ListenerConnection`].
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: ListenerState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub(crate) fn get(&self) -> ListenerState {
        ListenerState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Validated compare-and-swap transition. Returns the previous state.
    pub(crate) fn transition(&self, target: ListenerState) -> Result<ListenerState, Error> {
        let mut current = self.get();
        loop {
            current.transition_to(target)?;
            match self.0.compare_exchange(
                current.as_u8(),
                target.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = ListenerState::from_u8(actual),
            }
        }
    }

    fn force_closed(&self) {
        self.0.store(ListenerState::Closed.as_u8(), Ordering::Release);
    }
}

/// One registered fan-out target, owned by the session serving it.
///
/// Payloads published by the hub arrive on [`recv`](Self::recv) in publish
/// order. The cancellation token fires when the hub unregisters, evicts or
/// closes the listener.
pub struct ListenerConnection {
    id: ListenerId,
    registered_at: DateTime<Utc>,
    outbound: mpsc::Receiver<Utf8Bytes>,
    state: Arc<StateCell>,
    cancel: CancellationToken,
}

impl ListenerConnection {
    pub(crate) fn new(
        id: ListenerId,
        outbound: mpsc::Receiver<Utf8Bytes>,
        state: Arc<StateCell>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            registered_at: Utc::now(),
            outbound,
            state,
            cancel,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn state(&self) -> ListenerState {
        self.state.get()
    }

    /// Next outbound payload, or `None` once the hub has dropped this listener
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<Utf8Bytes> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Utf8Bytes> {
        self.outbound.try_recv().ok()
    }

    /// Token cancelled when the hub lets go of this listener.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Complete the close handshake (`Closing -> Closed`), or record an abrupt
    /// loss (`Open -> Closed`).
    pub fn finish(&self) -> Result<ListenerState, Error> {
        self.state.transition(ListenerState::Closed)
    }
}

impl fmt::Debug for ListenerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConnection")
            .field("id", &self.id)
            .field("registered_at", &self.registered_at)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ListenerConnection {
    fn drop(&mut self) {
        self.state.force_closed();
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use ListenerState::*;

        assert!(Connecting.can_transition_to(Open));
        assert!(Open.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(Open.can_transition_to(Closed));
        assert!(Connecting.can_transition_to(Closed));
    }

    #[test]
    fn test_closed_is_terminal() {
        use ListenerState::*;

        for target in [Connecting, Open, Closing, Closed] {
            assert!(!Closed.can_transition_to(target));
        }
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = ListenerState::Closing
            .transition_to(ListenerState::Open)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition { ref from, ref to } if from == "CLOSING" && to == "OPEN"
        ));
    }

    #[test]
    fn test_state_cell_transition() {
        let cell = StateCell::new(ListenerState::Connecting);
        assert_eq!(
            cell.transition(ListenerState::Open).unwrap(),
            ListenerState::Connecting
        );
        assert_eq!(cell.get(), ListenerState::Open);
        assert!(cell.transition(ListenerState::Connecting).is_err());
        assert_eq!(cell.get(), ListenerState::Open);
    }

    #[test]
    fn test_drop_marks_closed() {
        let (_tx, rx) = mpsc::channel(1);
        let state = Arc::new(StateCell::new(ListenerState::Open));
        let cancel = CancellationToken::new();
        let conn = ListenerConnection::new(Uuid::new_v4(), rx, state.clone(), cancel.clone());

        drop(conn);

        assert_eq!(state.get(), ListenerState::Closed);
        assert!(cancel.is_cancelled());
    }
}
