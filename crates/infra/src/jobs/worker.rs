//! Worker loop: claim, execute, report.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobqueue_core::{Job, JobStatus};

use super::executor::{Executor, JobResult};
use super::store::{JobStore, JobStoreError};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to wait after finding no job (or a store error) before claiming again
    pub claim_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            claim_backoff: Duration::from_secs(2),
        }
    }
}

impl WorkerConfig {
    pub fn with_claim_backoff(mut self, backoff: Duration) -> Self {
        self.claim_backoff = backoff;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Failed attempts, including ones that will be retried.
    pub jobs_failed: u64,
    /// Jobs that reached `FAILED` on this worker.
    pub jobs_exhausted: u64,
    pub store_errors: u64,
    pub last_error: Option<String>,
}

/// A single worker.
///
/// Holds no lock or connection while the executor runs; the claimed job is
/// protected only by its lease.
pub struct Worker<S, E> {
    name: String,
    store: S,
    executor: E,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S, E> Worker<S, E>
where
    S: JobStore + 'static,
    E: Executor + 'static,
{
    pub fn new(name: impl Into<String>, store: S, executor: E, config: WorkerConfig) -> Self {
        Self {
            name: name.into(),
            store,
            executor,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> WorkerStats {
        lock_stats(&self.stats).clone()
    }

    /// Claim and process at most one job.
    ///
    /// Returns `Ok(None)` when nothing was pending. Execution failures are
    /// reported to the store, not returned.
    pub async fn run_once(&self) -> Result<Option<JobResult>, JobStoreError> {
        let Some(job) = self.store.claim().await? else {
            return Ok(None);
        };

        debug!(
            worker = %self.name,
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempts + 1,
            "claimed job"
        );

        let result = self.execute(&job).await;
        let resolved = match &result {
            JobResult::Success => self.store.mark_success(job.id).await?,
            JobResult::Failure(message) => self.store.mark_failed(job.id, message).await?,
        };

        self.record(&job, &result, resolved.as_ref());
        Ok(Some(result))
    }

    async fn execute(&self, job: &Job) -> JobResult {
        let fut = self.executor.execute(&job.job_type, &job.payload);
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(worker = %self.name, job_id = %job.id, error = %message, "job handler panicked");
                JobResult::Failure(message)
            }
        }
    }

    fn record(&self, job: &Job, result: &JobResult, resolved: Option<&Job>) {
        let mut stats = lock_stats(&self.stats);
        stats.jobs_processed += 1;

        match result {
            JobResult::Success => stats.jobs_succeeded += 1,
            JobResult::Failure(message) => {
                stats.jobs_failed += 1;
                stats.last_error = Some(message.clone());
            }
        }

        match resolved {
            Some(next) if next.status == JobStatus::Failed => {
                stats.jobs_exhausted += 1;
                warn!(
                    worker = %self.name,
                    job_id = %job.id,
                    attempts = next.attempts,
                    error = next.error.as_deref().unwrap_or_default(),
                    "job failed permanently"
                );
            }
            Some(next) => {
                debug!(worker = %self.name, job_id = %job.id, status = %next.status, "job resolved");
            }
            // The sweeper got there first; the lease had already expired.
            None => {
                warn!(worker = %self.name, job_id = %job.id, "job was no longer running at completion");
            }
        }
    }

    fn record_store_error(&self, err: &JobStoreError) {
        let mut stats = lock_stats(&self.stats);
        stats.store_errors += 1;
        stats.last_error = Some(err.to_string());
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.name, "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.run_once().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker = %self.name, error = %e, "worker iteration failed");
                    self.record_store_error(&e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.claim_backoff) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(worker = %self.name, "worker stopped");
    }

    /// Spawn the worker loop on the current tokio runtime.
    pub fn spawn(name: impl Into<String>, store: S, executor: E, config: WorkerConfig) -> WorkerHandle {
        let worker = Self::new(name, store, executor, config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = worker.stats.clone();
        let name = worker.name.clone();

        let join = tokio::spawn(worker.run(shutdown_rx));

        WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

/// Handle to control a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        lock_stats(&self.stats).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop claiming and wait for the in-flight job, if any, to be reported.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(worker = %self.name, error = %e, "worker task ended abnormally");
        }
    }

    /// Stop immediately. An in-flight job stays `RUNNING` until its lease expires.
    pub fn abort(self) {
        self.join.abort();
    }
}

fn lock_stats(stats: &Mutex<WorkerStats>) -> MutexGuard<'_, WorkerStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job handler panicked: {s}")
    } else {
        "job handler panicked".to_string()
    }
}
