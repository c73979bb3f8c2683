//! Job storage implementations.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use jobqueue_core::{
    ChangeEvent, DeleteOutcome, DomainError, Job, JobEvent, JobId, JobStatus, NewJob, SweepReport,
};
use jobqueue_events::InMemoryEventBus;

/// Job store abstraction.
///
/// This is the only mutation surface for job records. Every transition is
/// applied atomically and followed by a [`ChangeEvent`] on the store's
/// notification channel.
///
/// Lookups and transitions on a missing (or wrong-state) job return `Ok(None)`;
/// errors are reserved for the store itself failing.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a new `PENDING` job.
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError>;

    /// Claim the oldest `PENDING` job, moving it to `RUNNING`.
    ///
    /// Concurrent callers never receive the same job.
    async fn claim(&self) -> Result<Option<Job>, JobStoreError>;

    /// Complete a `RUNNING` job successfully.
    async fn mark_success(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Record a failed attempt of a `RUNNING` job; retries or fails it for good.
    async fn mark_failed(&self, id: JobId, error: &str) -> Result<Option<Job>, JobStoreError>;

    /// Resolve every `RUNNING` job whose lease started more than `lease_timeout` ago.
    async fn sweep_abandoned(&self, lease_timeout: Duration) -> Result<SweepReport, JobStoreError>;

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    async fn get_status_by_id(&self, id: JobId) -> Result<Option<JobStatus>, JobStoreError>;

    /// Delete a job unless it is `RUNNING`.
    async fn delete_by_id(&self, id: JobId) -> Result<DeleteOutcome, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    /// The request was rejected before touching storage.
    #[error("invalid job: {0}")]
    InvalidInput(String),
    /// Connection/transaction failure; retrying later may succeed.
    #[error("storage error: {0}")]
    Transient(String),
}

impl From<DomainError> for JobStoreError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => JobStoreError::InvalidInput(msg),
            other => JobStoreError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError> {
        (**self).enqueue(job).await
    }

    async fn claim(&self) -> Result<Option<Job>, JobStoreError> {
        (**self).claim().await
    }

    async fn mark_success(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).mark_success(id).await
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<Option<Job>, JobStoreError> {
        (**self).mark_failed(id, error).await
    }

    async fn sweep_abandoned(&self, lease_timeout: Duration) -> Result<SweepReport, JobStoreError> {
        (**self).sweep_abandoned(lease_timeout).await
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        (**self).get_by_id(id).await
    }

    async fn get_status_by_id(&self, id: JobId) -> Result<Option<JobStatus>, JobStoreError> {
        (**self).get_status_by_id(id).await
    }

    async fn delete_by_id(&self, id: JobId) -> Result<DeleteOutcome, JobStoreError> {
        (**self).delete_by_id(id).await
    }
}

/// In-memory job store for tests/dev.
///
/// One mutex guards the whole table, which makes every operation trivially
/// serializable. Change events go to an in-memory bus after the lock is
/// released.
#[derive(Debug)]
pub struct InMemoryJobStore {
    state: Mutex<State>,
    events: Arc<InMemoryEventBus<ChangeEvent>>,
}

#[derive(Debug, Default)]
struct State {
    last_id: i64,
    jobs: BTreeMap<JobId, Job>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_bus(Arc::new(InMemoryEventBus::new()))
    }

    pub fn with_bus(events: Arc<InMemoryEventBus<ChangeEvent>>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// The bus this store announces changes on.
    pub fn events(&self) -> Arc<InMemoryEventBus<ChangeEvent>> {
        self.events.clone()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, JobStoreError> {
        self.state
            .lock()
            .map_err(|_| JobStoreError::Transient("in-memory job store lock poisoned".into()))
    }

    fn notify(&self, id: JobId) {
        if let Err(err) = self.events.publish(ChangeEvent::new(id)) {
            warn!(job_id = %id, error = %err, "failed to publish job change");
        }
    }

    /// Apply `event` to a job only if it is currently `RUNNING`.
    fn complete(&self, id: JobId, event: JobEvent) -> Result<Option<Job>, JobStoreError> {
        let updated = {
            let mut state = self.lock()?;
            let Some(job) = state.jobs.get_mut(&id) else {
                return Ok(None);
            };
            if job.status != JobStatus::Running {
                return Ok(None);
            }
            *job = job.apply(event, Utc::now())?;
            job.clone()
        };

        self.notify(id);
        Ok(Some(updated))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError> {
        job.validate()?;

        let created = {
            let mut state = self.lock()?;
            state.last_id += 1;
            let id = JobId::new(state.last_id);
            let created = Job::pending(id, job, Utc::now());
            state.jobs.insert(id, created.clone());
            created
        };

        self.notify(created.id);
        Ok(created)
    }

    async fn claim(&self) -> Result<Option<Job>, JobStoreError> {
        let claimed = {
            let mut state = self.lock()?;

            // Oldest first; ids break ties in insertion order.
            let next = state
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .min_by_key(|j| (j.created_at, j.id))
                .map(|j| j.id);

            let Some(id) = next else {
                return Ok(None);
            };
            let Some(job) = state.jobs.get_mut(&id) else {
                return Ok(None);
            };
            *job = job.apply(JobEvent::Claim, Utc::now())?;
            job.clone()
        };

        self.notify(claimed.id);
        Ok(Some(claimed))
    }

    async fn mark_success(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.complete(id, JobEvent::Succeed)
    }

    async fn mark_failed(&self, id: JobId, error: &str) -> Result<Option<Job>, JobStoreError> {
        self.complete(id, JobEvent::Fail(error.to_string()))
    }

    async fn sweep_abandoned(&self, lease_timeout: Duration) -> Result<SweepReport, JobStoreError> {
        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease_timeout).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = now.checked_sub_signed(lease) else {
            return Ok(SweepReport::default());
        };

        let mut report = SweepReport::default();
        {
            let mut state = self.lock()?;
            for job in state.jobs.values_mut().filter(|j| j.lease_expired(cutoff)) {
                *job = job.apply(JobEvent::LeaseExpired, now)?;
                match job.status {
                    JobStatus::Pending => report.requeued.push(job.clone()),
                    _ => report.failed.push(job.clone()),
                }
            }
        }

        for job in report.requeued.iter().chain(&report.failed) {
            self.notify(job.id);
        }
        Ok(report)
    }

    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn get_status_by_id(&self, id: JobId) -> Result<Option<JobStatus>, JobStoreError> {
        Ok(self.lock()?.jobs.get(&id).map(|j| j.status))
    }

    async fn delete_by_id(&self, id: JobId) -> Result<DeleteOutcome, JobStoreError> {
        let mut state = self.lock()?;
        match state.jobs.get(&id).map(|j| j.status) {
            None => Ok(DeleteOutcome::NotFound),
            Some(JobStatus::Running) => Ok(DeleteOutcome::Running),
            Some(_) => Ok(state
                .jobs
                .remove(&id)
                .map(DeleteOutcome::Deleted)
                .unwrap_or(DeleteOutcome::NotFound)),
        }
    }
}
