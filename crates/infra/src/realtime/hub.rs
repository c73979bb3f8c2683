//! Fan-out registry: which connections watch which job.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::mpsc;
use tracing::debug;

use jobqueue_core::{ConnectionId, JobId, StatusEnvelope};

use super::protocol::ServerMessage;

/// Outbound side of one observer connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    /// A handle and the receiver its messages arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the transport still has a reader.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Queue a message; `false` if the connection is gone.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.sender.send(message).is_ok()
    }
}

#[derive(Debug, Default)]
struct Registry {
    by_job: HashMap<JobId, HashMap<ConnectionId, ConnectionHandle>>,
    by_connection: HashMap<ConnectionId, JobId>,
}

impl Registry {
    fn remove(&mut self, connection: ConnectionId, job_id: JobId) -> bool {
        let Some(watchers) = self.by_job.get_mut(&job_id) else {
            return false;
        };
        let removed = watchers.remove(&connection).is_some();
        if watchers.is_empty() {
            self.by_job.remove(&job_id);
        }
        if removed && self.by_connection.get(&connection) == Some(&job_id) {
            self.by_connection.remove(&connection);
        }
        removed
    }
}

/// Registry of job subscriptions for live connections.
///
/// A connection watches at most one job; subscribing again moves it.
#[derive(Debug, Default)]
pub struct SubscriptionHub {
    registry: RwLock<Registry>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `connection` under `job_id`, replacing its previous subscription.
    pub fn subscribe(&self, connection: &ConnectionHandle, job_id: JobId) {
        let mut registry = self.write();
        if let Some(previous) = registry.by_connection.get(&connection.id()).copied() {
            if previous != job_id {
                registry.remove(connection.id(), previous);
            }
        }
        registry
            .by_job
            .entry(job_id)
            .or_default()
            .insert(connection.id(), connection.clone());
        registry.by_connection.insert(connection.id(), job_id);
    }

    /// Remove `connection` from `job_id`'s watchers. Returns whether it was there.
    pub fn unsubscribe(&self, connection: ConnectionId, job_id: JobId) -> bool {
        self.write().remove(connection, job_id)
    }

    /// Forget everything about `connection`. Returns the job it was watching.
    pub fn on_disconnect(&self, connection: ConnectionId) -> Option<JobId> {
        let mut registry = self.write();
        let job_id = registry.by_connection.get(&connection).copied()?;
        registry.remove(connection, job_id);
        Some(job_id)
    }

    /// Deliver `envelope` to every open connection watching its job.
    ///
    /// Connections found closed are dropped from the registry. Returns the
    /// number of deliveries.
    pub fn publish(&self, envelope: &StatusEnvelope) -> usize {
        let watchers: Vec<ConnectionHandle> = match self.read().by_job.get(&envelope.job_id) {
            Some(watchers) => watchers.values().cloned().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for connection in watchers {
            if connection.is_open() && connection.send(ServerMessage::Status(envelope.clone())) {
                delivered += 1;
            } else {
                closed.push(connection.id());
            }
        }

        if !closed.is_empty() {
            let mut registry = self.write();
            for connection in closed {
                debug!(connection = %connection, job_id = %envelope.job_id, "reaping closed connection");
                registry.remove(connection, envelope.job_id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.read().by_job.get(&job_id).map_or(0, HashMap::len)
    }

    /// Connections with an active subscription.
    pub fn connection_count(&self) -> usize {
        self.read().by_connection.len()
    }
}
