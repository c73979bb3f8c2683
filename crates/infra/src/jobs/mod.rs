//! Durable job queue: storage, execution and lease recovery.
//!
//! ## Components
//!
//! - `JobStore`: the only mutation surface for job records (in-memory or Postgres)
//! - `Executor`: what a worker runs for a claimed job
//! - `Worker`: claims jobs, executes them and reports the outcome
//! - `Sweeper`: periodically resolves jobs whose lease expired

pub mod executor;
pub mod postgres;
pub mod store;
pub mod sweeper;
pub mod worker;

pub use executor::{Executor, HandlerRegistry, JobResult};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use sweeper::{Sweeper, SweeperConfig, SweeperHandle, SweeperStats};
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerStats};
