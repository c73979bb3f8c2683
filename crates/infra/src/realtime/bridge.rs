//! Change notification bridge: durable channel → fan-out registry.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobqueue_core::ChangeEvent;
use jobqueue_events::{NotificationChannel, Subscription};

use super::hub::SubscriptionHub;
use crate::jobs::JobStore;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BridgeStats {
    pub events: u64,
    pub delivered: u64,
    /// Events whose job no longer existed or could not be read.
    pub dropped: u64,
}

/// Forwards store change events to subscribed observers.
///
/// Every event is re-resolved against the store; the payload is only a hint.
pub struct NotificationBridge;

impl NotificationBridge {
    /// Open the subscription and start forwarding.
    ///
    /// Failing to open the subscription is returned to the caller: without it
    /// no observer would ever hear about a transition.
    pub async fn start<C, S>(
        channel: C,
        store: S,
        hub: Arc<SubscriptionHub>,
    ) -> Result<BridgeHandle, C::Error>
    where
        C: NotificationChannel<ChangeEvent>,
        S: JobStore + 'static,
    {
        let subscription = channel.listen().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(BridgeStats::default()));

        let join = tokio::spawn(forward(subscription, store, hub, stats.clone(), shutdown_rx));
        info!("notification bridge started");

        Ok(BridgeHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        })
    }
}

async fn forward<S: JobStore>(
    mut subscription: Subscription<ChangeEvent>,
    store: S,
    hub: Arc<SubscriptionHub>,
    stats: Arc<Mutex<BridgeStats>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            event = subscription.recv() => event,
        };

        let Some(ChangeEvent { job_id }) = event else {
            error!("change feed ended; observers will no longer receive updates");
            break;
        };

        let delivered = match store.get_by_id(job_id).await {
            Ok(Some(job)) => Some(hub.publish(&job.envelope())),
            Ok(None) => {
                debug!(job_id = %job_id, "job gone before its change was delivered");
                None
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "failed to load changed job");
                None
            }
        };

        let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.events += 1;
        match delivered {
            Some(n) => stats.delivered += n as u64,
            None => stats.dropped += 1,
        }
    }

    info!("notification bridge stopped");
}

/// Handle to a running bridge.
#[derive(Debug)]
pub struct BridgeHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<BridgeStats>>,
}

impl BridgeHandle {
    pub fn stats(&self) -> BridgeStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "bridge task ended abnormally");
        }
    }
}
