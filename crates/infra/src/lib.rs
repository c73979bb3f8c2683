//! Infrastructure layer: job stores, background tasks, realtime fan-out.

pub mod config;
pub mod event_bus;
pub mod jobs;
pub mod realtime;
