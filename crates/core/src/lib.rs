//! `jobqueue-core`: job domain building blocks.
//!
//! This crate contains the **pure** job state machine and the wire types shared
//! by the store, the notification bridge and observers (no IO).

pub mod envelope;
pub mod error;
pub mod id;
pub mod job;
pub mod transition;

pub use envelope::{ChangeEvent, DeleteOutcome, StatusEnvelope, SweepReport};
pub use error::{DomainError, DomainResult};
pub use id::{ConnectionId, JobId};
pub use job::{DEFAULT_MAX_ATTEMPTS, Job, JobStatus, NewJob};
pub use transition::JobEvent;
