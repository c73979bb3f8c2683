//! Postgres `LISTEN/NOTIFY` change feed.
//!
//! Each `listen()` opens a dedicated `PgListener` connection and a forwarding
//! task. The task ends when the subscription is dropped.
//!
//! `PgListener::recv` reconnects on its own after a dropped connection;
//! notifications sent while it was disconnected are lost, which the bridge
//! tolerates (observers can always poll the job).

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use jobqueue_core::ChangeEvent;
use jobqueue_events::{NotificationChannel, Subscription};

const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("failed to open listener connection: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("failed to LISTEN on channel {channel}: {source}")]
    Listen {
        channel: String,
        #[source]
        source: sqlx::Error,
    },
}

/// Change feed over a Postgres notification channel.
#[derive(Debug, Clone)]
pub struct PgNotificationChannel {
    pool: PgPool,
    channel: String,
}

impl PgNotificationChannel {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl NotificationChannel<ChangeEvent> for PgNotificationChannel {
    type Error = FeedError;

    async fn listen(&self) -> Result<Subscription<ChangeEvent>, FeedError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(FeedError::Connect)?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|source| FeedError::Listen {
                channel: self.channel.clone(),
                source,
            })?;

        info!(channel = %self.channel, "listening for job changes");

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward(listener, self.channel.clone(), tx));

        Ok(Subscription::new(rx))
    }
}

async fn forward(
    mut listener: PgListener,
    channel: String,
    tx: mpsc::UnboundedSender<ChangeEvent>,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            received = listener.recv() => match received {
                Ok(notification) => match ChangeEvent::decode(notification.payload()) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            channel = %channel,
                            payload = notification.payload(),
                            error = %e,
                            "skipping malformed change notification"
                        );
                    }
                },
                Err(e) => {
                    warn!(channel = %channel, error = %e, "listener error; retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            },
        }
    }

    debug!(channel = %channel, "change feed closed");
}
