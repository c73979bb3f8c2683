//! Real-time job status delivery.
//!
//! ```text
//! store commit ──notify──▶ NotificationBridge ──get_by_id──▶ SubscriptionHub ──▶ Session outbox
//! ```
//!
//! The hub is an owned component; whoever builds the server creates one and
//! hands it to both the bridge and the observer endpoint.

pub mod bridge;
pub mod hub;
pub mod protocol;
pub mod session;

pub use bridge::{BridgeHandle, BridgeStats, NotificationBridge};
pub use hub::{ConnectionHandle, SubscriptionHub};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use session::Session;
