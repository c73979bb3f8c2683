//! Postgres job store tests.
//!
//! Run against a real database: set `DATABASE_URL`. Without it every test
//! returns early. Each test works in its own schema and notification channel.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use jobqueue_core::{ChangeEvent, DeleteOutcome, JobStatus, NewJob};
use jobqueue_events::NotificationChannel;
use jobqueue_infra::event_bus::PgNotificationChannel;
use jobqueue_infra::jobs::{JobStore, PostgresJobStore};

struct TestDb {
    store: PostgresJobStore,
    pool: PgPool,
    schema: String,
}

impl TestDb {
    async fn connect() -> Option<Self> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let suffix = uuid::Uuid::now_v7().simple().to_string();
        let schema = format!("jobqueue_test_{suffix}");

        let admin = PgPool::connect(&url).await.expect("connect to DATABASE_URL");
        admin
            .execute(format!("CREATE SCHEMA {schema}").as_str())
            .await
            .expect("create test schema");
        admin.close().await;

        let search_path = schema.clone();
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .after_connect(move |conn, _meta| {
                let statement = format!("SET search_path TO {search_path}");
                Box::pin(async move {
                    conn.execute(statement.as_str()).await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await
            .expect("connect test pool");

        let store = PostgresJobStore::new(pool.clone(), format!("jobs_{suffix}"));
        store.migrate().await.expect("migrate");

        Some(Self { store, pool, schema })
    }

    async fn drop_schema(self) {
        let _ = self
            .pool
            .execute(format!("DROP SCHEMA {} CASCADE", self.schema).as_str())
            .await;
        self.pool.close().await;
    }
}

macro_rules! db_or_skip {
    () => {
        match TestDb::connect().await {
            Some(db) => db,
            None => {
                eprintln!("DATABASE_URL not set; skipping");
                return;
            }
        }
    };
}

fn email(max_attempts: u32) -> NewJob {
    NewJob::new("send_email", serde_json::json!({"to": "a@example.com"})).with_max_attempts(max_attempts)
}

#[tokio::test]
async fn migrate_is_idempotent() {
    let db = db_or_skip!();
    db.store.migrate().await.unwrap();
    db.drop_schema().await;
}

#[tokio::test]
async fn enqueue_then_lookup() {
    let db = db_or_skip!();
    let job = db.store.enqueue(email(3)).await.unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_attempts, 3);
    assert_eq!(db.store.get_by_id(job.id).await.unwrap(), Some(job.clone()));
    assert_eq!(
        db.store.get_status_by_id(job.id).await.unwrap(),
        Some(JobStatus::Pending)
    );
    assert_eq!(db.store.get_by_id(jobqueue_core::JobId::new(i64::MAX)).await.unwrap(), None);

    db.drop_schema().await;
}

#[tokio::test]
async fn claims_oldest_first() {
    let db = db_or_skip!();
    let first = db.store.enqueue(email(3)).await.unwrap();
    let second = db.store.enqueue(email(3)).await.unwrap();

    assert_eq!(db.store.claim().await.unwrap().map(|j| j.id), Some(first.id));
    assert_eq!(db.store.claim().await.unwrap().map(|j| j.id), Some(second.id));
    assert_eq!(db.store.claim().await.unwrap(), None);

    db.drop_schema().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_are_exclusive() {
    let db = db_or_skip!();
    for _ in 0..10 {
        db.store.enqueue(email(3)).await.unwrap();
    }

    let store = Arc::new(db.store.clone());
    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.claim().await })
        })
        .collect();

    let mut claimed = Vec::new();
    for task in tasks {
        if let Some(job) = task.await.unwrap().unwrap() {
            assert_eq!(job.status, JobStatus::Running);
            claimed.push(job.id);
        }
    }

    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), 10);
    assert_eq!(unique.len(), 10);

    db.drop_schema().await;
}

#[tokio::test]
async fn failed_attempts_retry_then_fail() {
    let db = db_or_skip!();
    let job = db.store.enqueue(email(2)).await.unwrap();

    db.store.claim().await.unwrap();
    let retried = db.store.mark_failed(job.id, "smtp timeout").await.unwrap().unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.error.as_deref(), Some("smtp timeout"));
    assert!(retried.started_at.is_none());

    db.store.claim().await.unwrap();
    let failed = db.store.mark_failed(job.id, "smtp timeout").await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert!(failed.finished_at.is_some());

    // Terminal: further completions find nothing RUNNING.
    assert_eq!(db.store.mark_success(job.id).await.unwrap(), None);

    db.drop_schema().await;
}

#[tokio::test]
async fn success_clears_the_error() {
    let db = db_or_skip!();
    let job = db.store.enqueue(email(3)).await.unwrap();

    db.store.claim().await.unwrap();
    db.store.mark_failed(job.id, "flaky").await.unwrap();
    db.store.claim().await.unwrap();
    let done = db.store.mark_success(job.id).await.unwrap().unwrap();

    assert_eq!(done.status, JobStatus::Successful);
    assert_eq!(done.attempts, 2);
    assert_eq!(done.error, None);

    db.drop_schema().await;
}

#[tokio::test]
async fn deletion_guard() {
    let db = db_or_skip!();
    let running = db.store.enqueue(email(3)).await.unwrap();
    let pending = db.store.enqueue(email(3)).await.unwrap();
    db.store.claim().await.unwrap();

    assert_eq!(db.store.delete_by_id(running.id).await.unwrap(), DeleteOutcome::Running);
    assert!(matches!(
        db.store.delete_by_id(pending.id).await.unwrap(),
        DeleteOutcome::Deleted(job) if job.id == pending.id
    ));
    assert_eq!(db.store.delete_by_id(pending.id).await.unwrap(), DeleteOutcome::NotFound);

    db.drop_schema().await;
}

#[tokio::test]
async fn sweep_resolves_expired_leases() {
    let db = db_or_skip!();
    let retryable = db.store.enqueue(email(3)).await.unwrap();
    let exhausted = db.store.enqueue(email(1)).await.unwrap();
    db.store.claim().await.unwrap();
    db.store.claim().await.unwrap();

    // Spend the only attempt of the second job without resolving it.
    sqlx::query("UPDATE jobs SET attempts = max_attempts WHERE id = $1")
        .bind(exhausted.id.get())
        .execute(&db.pool)
        .await
        .unwrap();

    assert!(db.store.sweep_abandoned(Duration::from_secs(3600)).await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    let report = db.store.sweep_abandoned(Duration::ZERO).await.unwrap();
    assert_eq!(report.requeued.iter().map(|j| j.id).collect::<Vec<_>>(), vec![retryable.id]);
    assert_eq!(report.failed.iter().map(|j| j.id).collect::<Vec<_>>(), vec![exhausted.id]);
    assert_eq!(report.requeued[0].attempts, 1);
    assert!(report.failed[0].finished_at.is_some());

    // Exactly once: nothing is RUNNING any more.
    assert!(db.store.sweep_abandoned(Duration::ZERO).await.unwrap().is_empty());

    db.drop_schema().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completion_and_sweep_resolve_a_job_once() {
    let db = db_or_skip!();
    let (mut completed, mut swept) = (0, 0);

    for _ in 0..40 {
        db.store.enqueue(email(3)).await.unwrap();
        let claimed = db.store.claim().await.unwrap().expect("a pending job");

        let (success, sweep) = tokio::join!(
            db.store.mark_success(claimed.id),
            db.store.sweep_abandoned(Duration::ZERO),
        );
        let success = success.unwrap();
        let sweep = sweep.unwrap();
        let in_sweep = sweep
            .requeued
            .iter()
            .chain(sweep.failed.iter())
            .any(|job| job.id == claimed.id);

        assert!(
            success.is_some() != in_sweep,
            "job {} resolved by success={} sweep={}",
            claimed.id,
            success.is_some(),
            in_sweep
        );
        if success.is_some() {
            completed += 1;
        } else {
            swept += 1;
        }

        let status = db.store.get_status_by_id(claimed.id).await.unwrap();
        assert_ne!(status, Some(JobStatus::Running));
    }

    assert_eq!(completed + swept, 40);
    db.drop_schema().await;
}

#[tokio::test]
async fn transitions_are_announced_after_commit() {
    let db = db_or_skip!();
    let feed = PgNotificationChannel::new(db.pool.clone(), db.store.channel());
    let mut subscription = feed.listen().await.unwrap();

    let job = db.store.enqueue(email(3)).await.unwrap();
    db.store.claim().await.unwrap();
    db.store.mark_success(job.id).await.unwrap();

    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
            .await
            .expect("notification should arrive")
            .expect("feed open");
        assert_eq!(event, ChangeEvent::new(job.id));
    }

    // A completion that matches nothing rolls back and stays silent.
    assert_eq!(db.store.mark_success(job.id).await.unwrap(), None);
    assert!(
        tokio::time::timeout(Duration::from_millis(200), subscription.recv())
            .await
            .is_err()
    );

    drop(subscription);
    db.drop_schema().await;
}
