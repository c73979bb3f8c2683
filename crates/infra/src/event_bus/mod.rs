//! Infrastructure-backed notification channels.
//!
//! The channel abstraction lives in `jobqueue-events`; this module provides the
//! Postgres `LISTEN/NOTIFY` implementation.

pub mod pg_listen;

pub use pg_listen::{FeedError, PgNotificationChannel};
