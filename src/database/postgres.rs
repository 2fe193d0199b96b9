use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::DatabaseConfig;
use crate::database::manager::DatabaseError;
use crate::database::pool::{Connector, Pool, PoolStats};

const APPLICATION_NAME: &str = "pgwatch-api";

/// Opens sqlx Postgres pools with the configured bounds.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    type Pool = PgBackend;

    async fn connect(&self, config: &DatabaseConfig) -> Result<PgBackend, DatabaseError> {
        let options = connect_options(config)?;

        // max_idle_connections has no sqlx knob; idle connections are reaped by idle_timeout
        let pool = PgPoolOptions::new()
            .max_connections(config.max_open_connections)
            .min_connections(0)
            .max_lifetime(config.conn_max_lifetime)
            .idle_timeout(config.conn_max_idle_time)
            .acquire_timeout(config.connect_timeout)
            .connect_lazy_with(options);

        debug!(database = %config.redacted_connection_string(), "Created lazy database pool");
        Ok(PgBackend::new(pool))
    }
}

/// Connection options with session time zone and statement timeout applied.
pub fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions, DatabaseError> {
    let dsn = config.connection_string()?;
    let options: PgConnectOptions = dsn.parse()?;
    let statement_timeout = config.query_timeout.as_millis().to_string();

    Ok(options.application_name(APPLICATION_NAME).options([
        ("timezone", config.timezone.as_str()),
        ("statement_timeout", statement_timeout.as_str()),
    ]))
}

#[derive(Debug, Default)]
struct WaitCounters {
    count: AtomicU64,
    nanos: AtomicU64,
}

/// A `PgPool` plus the wait counters sqlx does not keep itself.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
    waits: Arc<WaitCounters>,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            waits: Arc::new(WaitCounters::default()),
        }
    }

    /// Check out a connection. This is the only checkout path: the raw
    /// `PgPool` is not exposed, so every checkout that finds the pool
    /// saturated is counted as a wait, together with the time spent blocked.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, DatabaseError> {
        let saturated = is_saturated(
            self.pool.num_idle(),
            self.pool.size(),
            self.pool.options().get_max_connections(),
        );
        self.timed_checkout(saturated, self.pool.acquire()).await
    }

    /// A saturated checkout that times out still counts as a wait.
    async fn timed_checkout<T, F>(&self, saturated: bool, checkout: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        let start = Instant::now();
        let result = checkout.await;
        if saturated {
            self.record_wait(start.elapsed());
        }
        Ok(result?)
    }

    fn record_wait(&self, waited: Duration) {
        let nanos = u64::try_from(waited.as_nanos()).unwrap_or(u64::MAX);
        self.waits.count.fetch_add(1, Ordering::Relaxed);
        self.waits.nanos.fetch_add(nanos, Ordering::Relaxed);
    }
}

fn is_saturated(idle: usize, open: u32, max_open: u32) -> bool {
    idle == 0 && open >= max_open
}

#[async_trait]
impl Pool for PgBackend {
    async fn ping(&self) -> Result<(), DatabaseError> {
        let mut conn = self.acquire().await?;
        sqlx::query("SELECT 1").execute(&mut *conn).await?;
        Ok(())
    }

    fn stats(&self) -> Result<PoolStats, DatabaseError> {
        if self.pool.is_closed() {
            return Err(DatabaseError::Closed);
        }
        let open = self.pool.size();
        let idle = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX).min(open);
        Ok(PoolStats {
            open,
            idle,
            in_use: open - idle,
            wait_count: self.waits.count.load(Ordering::Relaxed),
            wait_duration: Duration::from_nanos(self.waits.nanos.load(Ordering::Relaxed)),
        })
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_options_from_config() {
        let config = DatabaseConfig {
            host: "db.internal".into(),
            port: 6543,
            name: "starter".into(),
            ..DatabaseConfig::default()
        };
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("starter"));
    }

    #[test]
    fn checkout_waits_only_when_every_connection_is_busy() {
        assert!(is_saturated(0, 5, 5));
        assert!(!is_saturated(1, 5, 5));
        assert!(!is_saturated(0, 4, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn only_saturated_checkouts_are_counted_as_waits() {
        let backend = PgConnector.connect(&DatabaseConfig::default()).await.unwrap();

        let blocked = async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok::<_, sqlx::Error>(())
        };
        backend.timed_checkout(true, blocked).await.unwrap();
        backend
            .timed_checkout(false, async { Ok::<_, sqlx::Error>(()) })
            .await
            .unwrap();
        let timed_out = backend
            .timed_checkout(true, async { Err::<(), _>(sqlx::Error::PoolTimedOut) })
            .await;
        assert!(matches!(timed_out, Err(DatabaseError::Sqlx(sqlx::Error::PoolTimedOut))));

        let stats = backend.stats().unwrap();
        assert_eq!(stats.wait_count, 2);
        assert!(stats.wait_duration >= Duration::from_millis(40));
    }

    /// Needs a reachable Postgres in `DATABASE_URL`.
    #[tokio::test]
    #[ignore]
    async fn saturated_checkout_against_live_database() {
        let config = DatabaseConfig {
            url: std::env::var("DATABASE_URL").ok(),
            max_open_connections: 1,
            ..DatabaseConfig::default()
        };
        let backend = PgConnector.connect(&config).await.unwrap();
        let held = backend.acquire().await.unwrap();

        let waiter = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.acquire().await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);
        waiter.await.unwrap().unwrap();

        let stats = backend.stats().unwrap();
        assert_eq!(stats.wait_count, 1);
        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn lazy_pool_reports_empty_stats_and_counts_waits() {
        let config = DatabaseConfig::default();
        let backend = PgConnector.connect(&config).await.unwrap();
        let stats = backend.stats().unwrap();
        assert_eq!(stats.open, 0);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.wait_count, 0);

        backend.record_wait(Duration::from_millis(30));
        backend.record_wait(Duration::from_millis(20));
        let stats = backend.stats().unwrap();
        assert_eq!(stats.wait_count, 2);
        assert_eq!(stats.wait_duration, Duration::from_millis(50));

        backend.close().await.unwrap();
        assert!(matches!(backend.stats(), Err(DatabaseError::Closed)));
    }
}
