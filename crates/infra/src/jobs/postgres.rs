//! Postgres-backed job store.
//!
//! ## Transition protocol
//!
//! Every mutation runs in a single transaction that also issues
//! `pg_notify(channel, '{"jobId":<id>}')`. Postgres delivers notifications
//! only on commit, so listeners never hear about a transition that rolled back.
//!
//! | Operation | Mutual exclusion |
//! |-----------|------------------|
//! | `claim` | `SELECT … FOR UPDATE SKIP LOCKED` picks a row no other claimant holds |
//! | `mark_success` / `mark_failed` | `UPDATE … WHERE status = 'RUNNING'` (re-checked after any lock wait) |
//! | `sweep_abandoned` | expired rows locked with `SKIP LOCKED`, resolved in one statement |
//! | `delete_by_id` | `SELECT … FOR UPDATE` before the guarded delete |
//!
//! ## Error Mapping
//!
//! All SQLx errors become `JobStoreError::Transient`; rows that cannot be
//! decoded into a [`Job`] are reported the same way.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use jobqueue_core::{ChangeEvent, DeleteOutcome, Job, JobId, JobStatus, NewJob, SweepReport};

use super::store::{JobStore, JobStoreError};

const SCHEMA: [&str; 3] = [
    r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id            BIGSERIAL PRIMARY KEY,
        type          TEXT NOT NULL,
        payload       JSONB NOT NULL DEFAULT '{}'::jsonb,
        status        TEXT NOT NULL DEFAULT 'PENDING'
                      CHECK (status IN ('PENDING', 'RUNNING', 'SUCCESSFUL', 'FAILED')),
        attempts      INTEGER NOT NULL DEFAULT 0 CHECK (attempts >= 0),
        max_attempts  INTEGER NOT NULL DEFAULT 3 CHECK (max_attempts > 0),
        error         TEXT NULL,
        created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at    TIMESTAMPTZ NULL,
        finished_at   TIMESTAMPTZ NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS jobs_pending_idx
        ON jobs (created_at, id) WHERE status = 'PENDING'
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS jobs_running_idx
        ON jobs (started_at) WHERE status = 'RUNNING'
    "#,
];

/// Postgres-backed job store.
///
/// Cheap to clone; all clones share the connection pool. Each operation takes
/// one connection for the length of one transaction.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    channel: String,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Create the `jobs` table and its indexes if they are missing.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, JobStoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn notify(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        id: JobId,
    ) -> Result<(), JobStoreError> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(&self.channel)
            .bind(ChangeEvent::new(id).encode())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("notify", e))?;
        Ok(())
    }

    /// Run a single-row transition statement, notify, and commit.
    async fn transition(
        &self,
        operation: &'static str,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut tx = self.begin().await?;

        let row = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };

        let job = decode_job(operation, &row)?;
        self.notify(&mut tx, job.id).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(Some(job))
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(job_type = %job.job_type), err)]
    async fn enqueue(&self, job: NewJob) -> Result<Job, JobStoreError> {
        job.validate()?;
        let max_attempts = i32::try_from(job.max_attempts)
            .map_err(|_| JobStoreError::InvalidInput("max_attempts is too large".into()))?;

        let mut tx = self.begin().await?;
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (type, payload, status, max_attempts)
            VALUES ($1, $2, 'PENDING', $3)
            RETURNING *
            "#,
        )
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(max_attempts)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("enqueue", e))?;

        let created = decode_job("enqueue", &row)?;
        self.notify(&mut tx, created.id).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(created)
    }

    #[instrument(skip(self), err)]
    async fn claim(&self) -> Result<Option<Job>, JobStoreError> {
        // The lock and the status change happen in the same statement: a row
        // held by another claimant is skipped, never waited on and re-matched.
        self.transition(
            "claim",
            sqlx::query(
                r#"
                WITH next AS (
                    SELECT id
                    FROM jobs
                    WHERE status = 'PENDING'
                    ORDER BY created_at, id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED
                )
                UPDATE jobs
                SET status = 'RUNNING',
                    started_at = NOW()
                FROM next
                WHERE jobs.id = next.id
                RETURNING jobs.*
                "#,
            ),
        )
        .await
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn mark_success(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.transition(
            "mark_success",
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'SUCCESSFUL',
                    attempts = attempts + 1,
                    finished_at = NOW(),
                    error = NULL
                WHERE id = $1 AND status = 'RUNNING'
                RETURNING *
                "#,
            )
            .bind(id.get()),
        )
        .await
    }

    #[instrument(skip(self, error), fields(job_id = %id), err)]
    async fn mark_failed(&self, id: JobId, error: &str) -> Result<Option<Job>, JobStoreError> {
        self.transition(
            "mark_failed",
            sqlx::query(
                r#"
                UPDATE jobs
                SET attempts = attempts + 1,
                    error = $2,
                    status = CASE WHEN attempts + 1 < max_attempts THEN 'PENDING' ELSE 'FAILED' END,
                    started_at = CASE WHEN attempts + 1 < max_attempts THEN NULL ELSE started_at END,
                    finished_at = CASE WHEN attempts + 1 < max_attempts THEN NULL ELSE NOW() END
                WHERE id = $1 AND status = 'RUNNING'
                RETURNING *
                "#,
            )
            .bind(id.get())
            .bind(error.to_string()),
        )
        .await
    }

    #[instrument(skip(self), err)]
    async fn sweep_abandoned(&self, lease_timeout: Duration) -> Result<SweepReport, JobStoreError> {
        let mut tx = self.begin().await?;

        // Rows a worker is completing right now are locked and skipped; the
        // next sweep sees them only if they are still RUNNING by then.
        let rows = sqlx::query(
            r#"
            WITH expired AS (
                SELECT id
                FROM jobs
                WHERE status = 'RUNNING'
                  AND started_at < NOW() - make_interval(secs => $1)
                ORDER BY id
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = CASE WHEN jobs.attempts < jobs.max_attempts THEN 'PENDING' ELSE 'FAILED' END,
                attempts = CASE WHEN jobs.attempts < jobs.max_attempts THEN jobs.attempts + 1 ELSE jobs.attempts END,
                started_at = CASE WHEN jobs.attempts < jobs.max_attempts THEN NULL ELSE jobs.started_at END,
                finished_at = CASE WHEN jobs.attempts < jobs.max_attempts THEN NULL ELSE NOW() END
            FROM expired
            WHERE jobs.id = expired.id
            RETURNING jobs.*
            "#,
        )
        .bind(lease_timeout.as_secs_f64())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("sweep_abandoned", e))?;

        let mut report = SweepReport::default();
        for row in rows {
            let job = decode_job("sweep_abandoned", &row)?;
            self.notify(&mut tx, job.id).await?;
            match job.status {
                JobStatus::Pending => report.requeued.push(job),
                _ => report.failed.push(job),
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(report)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_by_id(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_by_id", e))?;

        row.map(|row| decode_job("get_by_id", &row)).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get_status_by_id(&self, id: JobId) -> Result<Option<JobStatus>, JobStoreError> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_status_by_id", e))?;

        status
            .map(|s| {
                s.parse::<JobStatus>()
                    .map_err(|e| JobStoreError::Transient(format!("get_status_by_id: {e}")))
            })
            .transpose()
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn delete_by_id(&self, id: JobId) -> Result<DeleteOutcome, JobStoreError> {
        let mut tx = self.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1 FOR UPDATE")
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("delete_by_id", e))?;

        let outcome = match status.as_deref() {
            None => DeleteOutcome::NotFound,
            Some("RUNNING") => DeleteOutcome::Running,
            Some(_) => {
                let row = sqlx::query("DELETE FROM jobs WHERE id = $1 RETURNING *")
                    .bind(id.get())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_by_id", e))?;
                DeleteOutcome::Deleted(decode_job("delete_by_id", &row)?)
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Ok(outcome)
    }
}

/// Raw `jobs` row.
struct JobRow {
    id: i64,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    attempts: i32,
    max_attempts: i32,
    error: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for JobRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRow {
            id: row.try_get("id")?,
            job_type: row.try_get("type")?,
            payload: row.try_get("payload")?,
            status: row.try_get("status")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: JobId::new(row.id),
            job_type: row.job_type,
            payload: row.payload,
            status: row.status.parse().map_err(|e| format!("{e}"))?,
            attempts: u32::try_from(row.attempts).map_err(|_| "negative attempts".to_string())?,
            max_attempts: u32::try_from(row.max_attempts)
                .map_err(|_| "negative max_attempts".to_string())?,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

fn decode_job(operation: &str, row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
    let raw = <JobRow as sqlx::FromRow<'_, _>>::from_row(row)
        .map_err(|e| map_sqlx_error(operation, e))?;
    Job::try_from(raw).map_err(|e| {
        JobStoreError::Transient(format!("failed to decode job row in {operation}: {e}"))
    })
}

/// Map SQLx errors into `JobStoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    match err {
        sqlx::Error::Database(db_err) => JobStoreError::Transient(format!(
            "database error in {}: {} (code {})",
            operation,
            db_err.message(),
            db_err.code().as_deref().unwrap_or("none")
        )),
        sqlx::Error::PoolTimedOut => {
            JobStoreError::Transient(format!("timed out acquiring a connection in {operation}"))
        }
        sqlx::Error::PoolClosed => {
            JobStoreError::Transient(format!("connection pool closed in {operation}"))
        }
        _ => JobStoreError::Transient(format!("sqlx error in {}: {}", operation, err)),
    }
}
