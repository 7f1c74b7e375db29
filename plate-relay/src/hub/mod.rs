//! Broadcast hub: the registry of live listeners and isolated fan-out.

mod connection;
mod handle;
mod service;

pub use connection::{ListenerConnection, ListenerId, ListenerState};
pub use handle::{DEFAULT_OUTBOUND_CAPACITY, DEFAULT_SEND_TIMEOUT, DeliveryError, OutboundHandle};
pub use service::{BroadcastHub, DeliveryReport, HubConfig, HubStatsSnapshot};
