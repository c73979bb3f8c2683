//! The execution seam: what a worker runs for a claimed job.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

/// Outcome of executing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed with an error message
    Failure(String),
}

impl JobResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for JobResult {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}

/// Runs the actual work for a job.
///
/// Implementations may take arbitrarily long; the worker imposes no timeout of
/// its own (a hung job is recovered by the lease sweep).
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job_type: &str, payload: &serde_json::Value) -> JobResult;
}

#[async_trait]
impl<E> Executor for Arc<E>
where
    E: Executor + ?Sized,
{
    async fn execute(&self, job_type: &str, payload: &serde_json::Value) -> JobResult {
        (**self).execute(job_type, payload).await
    }
}

type Handler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, JobResult> + Send + Sync>;

/// An [`Executor`] that routes jobs to handlers by type.
///
/// Lookup order: exact type, then `prefix.*` patterns, then `*`.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Handler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a job type pattern.
    pub fn register<F, Fut>(&mut self, pattern: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobResult> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.insert(pattern.into(), handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn get_handler(&self, job_type: &str) -> Option<&Handler> {
        if let Some(h) = self.handlers.get(job_type) {
            return Some(h);
        }

        // Category match: "email.*" matches "email.welcome".
        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if job_type
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.'))
                {
                    return Some(handler);
                }
            }
        }

        self.handlers.get("*")
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("patterns", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Executor for HandlerRegistry {
    async fn execute(&self, job_type: &str, payload: &serde_json::Value) -> JobResult {
        match self.get_handler(job_type) {
            Some(handler) => handler(payload.clone()).await,
            None => JobResult::Failure(format!("no handler for job type: {job_type}")),
        }
    }
}
