//! HTTP API: job routes, the observer WebSocket, and process wiring.

pub mod app;
pub mod executors;
