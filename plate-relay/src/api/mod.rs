//! Listener-facing HTTP/WebSocket surface.

pub mod routes;
pub mod server;

pub use server::{AppState, RelayServer};
