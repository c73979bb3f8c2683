//! Configuration loading and representation.
//!
//! Every option has a default; environment variables override them. Values
//! that fail to parse are logged and the default is kept.

use std::str::FromStr;
use std::time::Duration;

use jobqueue_core::DEFAULT_MAX_ATTEMPTS;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::jobs::{SweeperConfig, WorkerConfig};

/// Channel name used for job change notifications.
pub const DEFAULT_NOTIFY_CHANNEL: &str = "job_events";

/// Queue behaviour shared by workers, the sweeper and the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a `RUNNING` job may go unresolved before it is recovered.
    pub lease_timeout: Duration,
    /// How often the sweeper looks for expired leases.
    pub sweep_interval: Duration,
    /// Worker sleep when there is nothing to claim.
    pub claim_backoff: Duration,
    /// `max_attempts` for jobs enqueued without one.
    pub default_max_attempts: u32,
    /// Worker loops started by the process.
    pub worker_count: usize,
    /// Durable notification channel name.
    pub notify_channel: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
            claim_backoff: Duration::from_secs(2),
            default_max_attempts: DEFAULT_MAX_ATTEMPTS,
            worker_count: 1,
            notify_channel: DEFAULT_NOTIFY_CHANNEL.to_string(),
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let default_max_attempts = parse_or(
            &lookup,
            "JOBQUEUE_DEFAULT_MAX_ATTEMPTS",
            defaults.default_max_attempts,
        );

        Self {
            lease_timeout: secs_or(&lookup, "JOBQUEUE_LEASE_TIMEOUT_SECS", defaults.lease_timeout),
            sweep_interval: nonzero_or(
                "JOBQUEUE_SWEEP_INTERVAL_SECS",
                secs_or(&lookup, "JOBQUEUE_SWEEP_INTERVAL_SECS", defaults.sweep_interval),
                defaults.sweep_interval,
            ),
            claim_backoff: nonzero_or(
                "JOBQUEUE_CLAIM_BACKOFF_MS",
                millis_or(&lookup, "JOBQUEUE_CLAIM_BACKOFF_MS", defaults.claim_backoff),
                defaults.claim_backoff,
            ),
            default_max_attempts: if default_max_attempts == 0 {
                tracing::warn!("JOBQUEUE_DEFAULT_MAX_ATTEMPTS must be positive; using default");
                defaults.default_max_attempts
            } else {
                default_max_attempts
            },
            worker_count: parse_or(&lookup, "JOBQUEUE_WORKERS", defaults.worker_count),
            notify_channel: lookup("JOBQUEUE_NOTIFY_CHANNEL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.notify_channel),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default().with_claim_backoff(self.claim_backoff)
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            interval: self.sweep_interval,
            lease_timeout: self.lease_timeout,
        }
    }
}

/// Postgres connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            acquire_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(60),
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            max_connections: parse_or(&lookup, "JOBQUEUE_DB_MAX_CONNECTIONS", defaults.max_connections),
            acquire_timeout: millis_or(&lookup, "JOBQUEUE_DB_ACQUIRE_TIMEOUT_MS", defaults.acquire_timeout),
            idle_timeout: secs_or(&lookup, "JOBQUEUE_DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            max_lifetime: secs_or(&lookup, "JOBQUEUE_DB_MAX_LIFETIME_SECS", defaults.max_lifetime),
        }
    }

    /// Open a connection pool.
    pub async fn connect(&self) -> Result<PgPool, sqlx::Error> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| sqlx::Error::Configuration("DATABASE_URL is not set".into()))?;

        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .idle_timeout(Some(self.idle_timeout))
            .max_lifetime(Some(self.max_lifetime))
            .connect(url)
            .await
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable configuration value");
                default
            }
        },
    }
}

fn secs_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(lookup, key, default.as_secs()))
}

fn millis_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> Duration {
    Duration::from_millis(parse_or(lookup, key, default.as_millis() as u64))
}

/// Timer periods must be positive: a zero sweep interval panics the timer and
/// a zero backoff turns idle workers into a busy loop.
fn nonzero_or(key: &str, value: Duration, default: Duration) -> Duration {
    if value.is_zero() {
        tracing::warn!(key, "must be positive; using default");
        default
    } else {
        value
    }
}
