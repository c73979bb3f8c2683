//! Change-notification plumbing (mechanics only).
//!
//! Stores publish small change events; listeners receive them through a
//! [`Subscription`]. Concrete transports live in `jobqueue-infra`.

pub mod bus;
pub mod in_memory_bus;

pub use bus::{NotificationChannel, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
