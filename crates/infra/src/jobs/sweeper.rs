//! Periodic lease recovery.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use jobqueue_core::SweepReport;

use super::store::{JobStore, JobStoreError};

/// Shortest period the timer accepts.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// A `RUNNING` job whose lease is older than this is abandoned
    pub lease_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lease_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweeperStats {
    pub sweeps: u64,
    pub requeued: u64,
    pub failed: u64,
    pub errors: u64,
}

/// Resolves jobs whose worker stopped reporting.
pub struct Sweeper<S> {
    store: S,
    config: SweeperConfig,
    stats: Arc<Mutex<SweeperStats>>,
}

impl<S: JobStore + 'static> Sweeper<S> {
    pub fn new(store: S, config: SweeperConfig) -> Self {
        Self {
            store,
            config,
            stats: Arc::new(Mutex::new(SweeperStats::default())),
        }
    }

    /// Run a single sweep.
    pub async fn run_once(&self) -> Result<SweepReport, JobStoreError> {
        let result = self.store.sweep_abandoned(self.config.lease_timeout).await;
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.sweeps += 1;

        match &result {
            Ok(report) if report.is_empty() => debug!("sweep found no abandoned jobs"),
            Ok(report) => {
                stats.requeued += report.requeued.len() as u64;
                stats.failed += report.failed.len() as u64;
                warn!(
                    requeued = report.requeued.len(),
                    failed = report.failed.len(),
                    "recovered abandoned jobs"
                );
            }
            Err(_) => stats.errors += 1,
        }

        result
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            lease_timeout_secs = self.config.lease_timeout.as_secs_f64(),
            "sweeper started"
        );

        if self.config.interval < MIN_INTERVAL {
            warn!(
                interval_secs = self.config.interval.as_secs_f64(),
                "sweep interval too short; clamping"
            );
        }

        // First sweep one full period after startup.
        let period = self.config.interval.max(MIN_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "sweep failed");
                    }
                }
            }
        }

        info!("sweeper stopped");
    }

    pub fn spawn(store: S, config: SweeperConfig) -> SweeperHandle {
        let sweeper = Self::new(store, config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = sweeper.stats.clone();
        let join = tokio::spawn(sweeper.run(shutdown_rx));

        SweeperHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<SweeperStats>>,
}

impl SweeperHandle {
    pub fn stats(&self) -> SweeperStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the timer; a sweep already running completes first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "sweeper task ended abnormally");
        }
    }
}
