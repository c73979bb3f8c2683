//! Per-connection observer state.

use tracing::debug;

use jobqueue_core::{ConnectionId, JobId};

use super::hub::{ConnectionHandle, SubscriptionHub};
use super::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// State of one observer connection.
///
/// Transitions happen only through [`Session::handle_text`] and
/// [`Session::close`]; replies go out through the connection's own outbox so
/// they stay ordered with pushed status envelopes.
#[derive(Debug)]
pub struct Session {
    connection: ConnectionHandle,
    subscribed: Option<JobId>,
    open: bool,
}

impl Session {
    pub fn new(connection: ConnectionHandle) -> Self {
        Self {
            connection,
            subscribed: None,
            open: true,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn subscribed(&self) -> Option<JobId> {
        self.subscribed
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Apply one inbound text frame.
    ///
    /// A malformed frame leaves the session unchanged.
    pub fn handle_text(&mut self, hub: &SubscriptionHub, text: &str) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::SessionClosed);
        }

        match ClientMessage::parse(text)? {
            ClientMessage::Subscribe { job_id } => {
                hub.subscribe(&self.connection, job_id);
                self.subscribed = Some(job_id);
                self.reply(ServerMessage::subscribed(job_id));
            }
            ClientMessage::Unsubscribe { job_id } => {
                hub.unsubscribe(self.connection.id(), job_id);
                if self.subscribed == Some(job_id) {
                    self.subscribed = None;
                }
                self.reply(ServerMessage::unsubscribed(job_id));
            }
        }

        Ok(())
    }

    /// Drop every subscription. Safe to call more than once.
    pub fn close(&mut self, hub: &SubscriptionHub) {
        if !self.open {
            return;
        }
        hub.on_disconnect(self.connection.id());
        self.subscribed = None;
        self.open = false;
    }

    fn reply(&self, message: ServerMessage) {
        if !self.connection.send(message) {
            debug!(connection = %self.connection.id(), "reply dropped; connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmation(text: &str) -> ServerMessage {
        ServerMessage::Confirmation {
            message: text.to_string(),
        }
    }

    #[test]
    fn subscribe_and_unsubscribe_are_confirmed() {
        let hub = SubscriptionHub::new();
        let (connection, mut outbox) = ConnectionHandle::channel();
        let mut session = Session::new(connection);

        session
            .handle_text(&hub, r#"{"action":"subscribe","jobId":42}"#)
            .unwrap();
        assert_eq!(session.subscribed(), Some(JobId::new(42)));
        assert_eq!(hub.subscriber_count(JobId::new(42)), 1);
        assert_eq!(outbox.try_recv().unwrap(), confirmation("Subscribed to job 42"));

        session
            .handle_text(&hub, r#"{"action":"unsubscribe","jobId":42}"#)
            .unwrap();
        assert_eq!(session.subscribed(), None);
        assert_eq!(hub.subscriber_count(JobId::new(42)), 0);
        assert_eq!(outbox.try_recv().unwrap(), confirmation("Unsubscribed from job 42"));
    }

    #[test]
    fn unsubscribing_another_job_keeps_the_subscription() {
        let hub = SubscriptionHub::new();
        let (connection, _outbox) = ConnectionHandle::channel();
        let mut session = Session::new(connection);

        session
            .handle_text(&hub, r#"{"action":"subscribe","jobId":1}"#)
            .unwrap();
        session
            .handle_text(&hub, r#"{"action":"unsubscribe","jobId":2}"#)
            .unwrap();

        assert_eq!(session.subscribed(), Some(JobId::new(1)));
        assert_eq!(hub.subscriber_count(JobId::new(1)), 1);
    }

    #[test]
    fn malformed_frames_change_nothing() {
        let hub = SubscriptionHub::new();
        let (connection, mut outbox) = ConnectionHandle::channel();
        let mut session = Session::new(connection);
        session
            .handle_text(&hub, r#"{"action":"subscribe","jobId":5}"#)
            .unwrap();
        outbox.try_recv().unwrap();

        let err = session.handle_text(&hub, "{oops").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
        assert!(session.is_open());
        assert_eq!(session.subscribed(), Some(JobId::new(5)));
        assert!(outbox.try_recv().is_err());
    }

    #[test]
    fn close_releases_subscriptions() {
        let hub = SubscriptionHub::new();
        let (connection, _outbox) = ConnectionHandle::channel();
        let mut session = Session::new(connection);
        session
            .handle_text(&hub, r#"{"action":"subscribe","jobId":3}"#)
            .unwrap();

        session.close(&hub);
        session.close(&hub);

        assert!(!session.is_open());
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(
            session.handle_text(&hub, r#"{"action":"subscribe","jobId":3}"#),
            Err(ProtocolError::SessionClosed)
        );
    }
}
