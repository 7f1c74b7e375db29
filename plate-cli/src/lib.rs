//! Client side of plate-relay: a reconnecting listener session and a mock
//! detection producer, both driven by the `plate` binary.

pub mod backoff;
pub mod cli;
pub mod error;
pub mod output;
pub mod session;
pub mod simulate;

pub use error::{Result, SessionError};
