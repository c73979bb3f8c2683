//! Notification channel abstraction.
//!
//! The channel is the bridge between a durable store and ephemeral listeners:
//!
//! ```text
//! Store (commit + notify) → NotificationChannel → Subscription → bridge → observers
//! ```
//!
//! ## Delivery Guarantees
//!
//! - **Best effort, at most once**: listeners that are not connected at publish
//!   time miss the message
//! - **No ordering across publishers**
//! - **Small payloads**: messages identify what changed; consumers re-read the
//!   source of truth
//!
//! Consumers must therefore treat a message as a hint to refresh, never as the
//! state itself.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TryRecvError};

/// A live subscription to a notification channel.
///
/// Each subscription gets a copy of every message published while it is alive.
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Source of change notifications.
#[async_trait]
pub trait NotificationChannel<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Start listening. Failure here means no notifications will ever arrive.
    async fn listen(&self) -> Result<Subscription<M>, Self::Error>;
}

#[async_trait]
impl<M, C> NotificationChannel<M> for Arc<C>
where
    M: Send + 'static,
    C: NotificationChannel<M> + ?Sized,
{
    type Error = C::Error;

    async fn listen(&self) -> Result<Subscription<M>, Self::Error> {
        (**self).listen().await
    }
}
