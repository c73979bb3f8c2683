//! Demo job handlers served by the binary.
//!
//! - `sleep`: waits `payload.ms` milliseconds (default 1000), then succeeds
//! - `fail`: fails with `payload.error` (default "job failed")
//! - anything else succeeds immediately

use std::time::Duration;

use jobqueue_infra::jobs::{HandlerRegistry, JobResult};

const DEFAULT_SLEEP_MS: u64 = 1_000;

pub fn demo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register("sleep", |payload| async move {
            let ms = payload["ms"].as_u64().unwrap_or(DEFAULT_SLEEP_MS);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            JobResult::Success
        })
        .register("fail", |payload| async move {
            let message = payload["error"].as_str().unwrap_or("job failed");
            JobResult::failure(message)
        })
        .register("*", |_| async { JobResult::Success });
    registry
}
