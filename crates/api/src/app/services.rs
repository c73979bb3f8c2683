//! Service wiring: store selection and background tasks.
//!
//! `USE_PERSISTENT_STORES=true` selects Postgres (`DATABASE_URL` required);
//! otherwise everything runs in memory.

use std::sync::Arc;

use tracing::info;

use jobqueue_events::InMemoryBusError;
use jobqueue_infra::config::{DatabaseConfig, QueueConfig};
use jobqueue_infra::event_bus::{FeedError, PgNotificationChannel};
use jobqueue_infra::jobs::{
    Executor, InMemoryJobStore, JobStore, JobStoreError, PostgresJobStore, Sweeper, SweeperHandle,
    Worker, WorkerHandle,
};
use jobqueue_infra::realtime::{BridgeHandle, NotificationBridge, SubscriptionHub};

/// Shared state for request handlers.
pub struct AppServices {
    pub store: Arc<dyn JobStore>,
    pub hub: Arc<SubscriptionHub>,
    pub queue: QueueConfig,
}

impl AppServices {
    pub fn new(store: Arc<dyn JobStore>, hub: Arc<SubscriptionHub>, queue: QueueConfig) -> Self {
        Self { store, hub, queue }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("USE_PERSISTENT_STORES=true requires DATABASE_URL")]
    MissingDatabaseUrl,
    #[error("failed to connect to Postgres: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to prepare the job store: {0}")]
    Store(#[from] JobStoreError),
    #[error("failed to subscribe to job changes: {0}")]
    Feed(#[from] FeedError),
    #[error("failed to subscribe to job changes: {0}")]
    Bus(#[from] InMemoryBusError),
}

/// Workers, sweeper and bridge owned by the process.
#[derive(Debug)]
pub struct BackgroundTasks {
    workers: Vec<WorkerHandle>,
    sweeper: SweeperHandle,
    bridge: BridgeHandle,
}

impl BackgroundTasks {
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Stop claiming, let in-flight jobs report, then stop the sweeper and bridge.
    pub async fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown().await;
        }
        self.sweeper.shutdown().await;
        self.bridge.shutdown().await;
        info!("background tasks stopped");
    }
}

/// A wired application: handler state plus the tasks behind it.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub tasks: BackgroundTasks,
}

/// Build from the environment.
pub async fn start_from_env(executor: Arc<dyn Executor>) -> Result<Runtime, StartupError> {
    let queue = QueueConfig::from_env();
    let use_persistent = std::env::var("USE_PERSISTENT_STORES")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    if use_persistent {
        start_persistent(queue, DatabaseConfig::from_env(), executor).await
    } else {
        start_in_memory(queue, executor).await
    }
}

/// In-memory wiring (dev/test).
pub async fn start_in_memory(
    queue: QueueConfig,
    executor: Arc<dyn Executor>,
) -> Result<Runtime, StartupError> {
    let store = InMemoryJobStore::arc();
    let hub = Arc::new(SubscriptionHub::new());

    let bridge = NotificationBridge::start(store.events(), store.clone(), hub.clone()).await?;
    info!(store = "in-memory", "job store ready");

    Ok(start_tasks(store, hub, queue, executor, bridge))
}

/// Postgres wiring. Runs migrations before anything else.
pub async fn start_persistent(
    queue: QueueConfig,
    database: DatabaseConfig,
    executor: Arc<dyn Executor>,
) -> Result<Runtime, StartupError> {
    if database.url.is_none() {
        return Err(StartupError::MissingDatabaseUrl);
    }

    let pool = database.connect().await?;
    let store = Arc::new(PostgresJobStore::new(pool.clone(), queue.notify_channel.clone()));
    store.migrate().await?;

    let hub = Arc::new(SubscriptionHub::new());
    let feed = PgNotificationChannel::new(pool, queue.notify_channel.clone());
    let bridge = NotificationBridge::start(feed, store.clone(), hub.clone()).await?;
    info!(store = "postgres", channel = %queue.notify_channel, "job store ready");

    Ok(start_tasks(store, hub, queue, executor, bridge))
}

fn start_tasks(
    store: Arc<dyn JobStore>,
    hub: Arc<SubscriptionHub>,
    queue: QueueConfig,
    executor: Arc<dyn Executor>,
    bridge: BridgeHandle,
) -> Runtime {
    let workers = (0..queue.worker_count)
        .map(|i| {
            Worker::spawn(
                format!("worker-{i}"),
                store.clone(),
                executor.clone(),
                queue.worker_config(),
            )
        })
        .collect();
    let sweeper = Sweeper::spawn(store.clone(), queue.sweeper_config());

    info!(
        workers = queue.worker_count,
        lease_timeout_secs = queue.lease_timeout.as_secs(),
        sweep_interval_secs = queue.sweep_interval.as_secs(),
        "background tasks started"
    );

    Runtime {
        services: Arc::new(AppServices::new(store, hub, queue)),
        tasks: BackgroundTasks {
            workers,
            sweeper,
            bridge,
        },
    }
}
