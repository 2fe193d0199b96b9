use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, DatabaseConfig};
use crate::database::pool::{Connector, Pool};
use crate::database::postgres::PgBackend;
use crate::database::status::{ConnectionMetrics, HealthStatus};
use crate::monitoring::{ErrorReporter, Report};

/// Errors from the ConnectionManager and the pool backends
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database after {attempts} attempt(s)")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: Box<DatabaseError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database did not respond within {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error("Database connection is closed")]
    Closed,

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Debug, Default)]
struct HealthState {
    status: HealthStatus,
    // Monotonic time of the last completed probe, drives the fast-check window.
    checked_at: Option<Instant>,
}

struct Shared<P: Pool> {
    pool: P,
    config: DatabaseConfig,
    reporter: Arc<dyn ErrorReporter>,
    health: RwLock<HealthState>,
    metrics: RwLock<ConnectionMetrics>,
    probe_in_flight: AtomicBool,
    closed: AtomicBool,
}

/// Owns one pooled database handle and supervises it: connect with retry,
/// periodic and on-demand liveness probes, periodic pool metrics, and a
/// single-shot close.
pub struct ConnectionManager<P: Pool = PgBackend> {
    shared: Arc<Shared<P>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Pool> ConnectionManager<P> {
    /// Open the pool, retrying with a fixed delay. Returns an error once every
    /// attempt has failed; callers are expected to abort startup on it.
    pub async fn connect<C>(
        connector: &C,
        config: DatabaseConfig,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, DatabaseError>
    where
        C: Connector<Pool = P>,
    {
        config.validate()?;
        let max_attempts = config.effective_retry_attempts();

        let mut attempt = 1;
        let pool = loop {
            info!(attempt, max_attempts, "Attempting to connect to database");

            match Self::open_and_verify(connector, &config).await {
                Ok(pool) => break pool,
                Err(e) => {
                    reporter.capture(
                        Report::new("database_connection", &e)
                            .tag("attempt", attempt)
                            .tag("retry_count", attempt),
                    );
                    error!(attempt, error = %e, "Database connection attempt failed");

                    if attempt >= max_attempts {
                        return Err(DatabaseError::ConnectFailed {
                            attempts: max_attempts,
                            source: Box::new(e),
                        });
                    }
                    tokio::time::sleep(config.retry_delay).await;
                    attempt += 1;
                }
            }
        };

        info!(
            retries = attempt - 1,
            max_open = config.max_open_connections,
            max_idle = config.max_idle_connections,
            "Database connection established successfully"
        );

        let health = HealthState {
            status: HealthStatus {
                is_healthy: true,
                retry_count: 0,
                ..HealthStatus::default()
            },
            checked_at: None,
        };

        let shared = Arc::new(Shared {
            pool,
            config,
            reporter,
            health: RwLock::new(health),
            metrics: RwLock::new(ConnectionMetrics::default()),
            probe_in_flight: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        if let Err(e) = shared.update_metrics().await {
            warn!(error = %e, "Initial connection metrics unavailable");
        }

        let tasks = vec![
            spawn_health_loop(Arc::clone(&shared)),
            spawn_metrics_loop(Arc::clone(&shared)),
        ];

        Ok(Self {
            shared,
            tasks: Mutex::new(tasks),
        })
    }

    async fn open_and_verify<C>(connector: &C, config: &DatabaseConfig) -> Result<P, DatabaseError>
    where
        C: Connector<Pool = P>,
    {
        let pool = connector.connect(config).await?;

        let verified = match tokio::time::timeout(config.connect_timeout, pool.ping()).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout(config.connect_timeout)),
        };

        match verified {
            Ok(()) => Ok(pool),
            Err(e) => {
                if let Err(close_err) = pool.close().await {
                    debug!(error = %close_err, "Failed to discard unverified pool");
                }
                Err(e)
            }
        }
    }

    /// The live pool, for repository-layer callers.
    pub fn pool(&self) -> &P {
        &self.shared.pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.shared.config
    }

    /// Probe the database now and return the resulting status.
    pub async fn health_check(&self) -> HealthStatus {
        self.shared.health_check().await
    }

    /// Serve the cached status while it is fresh. A stale read schedules a
    /// probe in the background and still returns the cached status.
    pub async fn fast_health_check(&self) -> HealthStatus {
        let (snapshot, stale) = self.shared.cached_health().await;

        if stale
            && !self.is_closed()
            && !self.shared.probe_in_flight.swap(true, Ordering::AcqRel)
        {
            let shared = Arc::clone(&self.shared);
            let probe = tokio::spawn(async move {
                shared.health_check().await;
                shared.probe_in_flight.store(false, Ordering::Release);
            });
            self.track(probe);
        }

        snapshot
    }

    /// Last recorded status, without probing.
    pub async fn health_status(&self) -> HealthStatus {
        self.shared.health.read().await.status.clone()
    }

    pub async fn is_healthy(&self) -> bool {
        self.shared.health.read().await.status.is_healthy
    }

    pub async fn metrics(&self) -> ConnectionMetrics {
        self.shared.metrics.read().await.clone()
    }

    /// Poll the pool immediately instead of waiting for the next interval.
    pub async fn refresh_metrics(&self) -> Result<ConnectionMetrics, DatabaseError> {
        self.shared.update_metrics().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop the background loops and close the pool. Only the first call
    /// touches the pool; later calls return `Ok(())`.
    pub async fn close(&self) -> Result<(), DatabaseError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("Database connection already closed");
            return Ok(());
        }

        self.abort_tasks();

        match self.shared.pool.close().await {
            Ok(()) => {
                let mut state = self.shared.health.write().await;
                state.status.is_healthy = false;
                state.status.last_error = Some(DatabaseError::Closed.to_string());
                drop(state);

                info!("Database connection closed gracefully");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to close database connection");
                Err(e)
            }
        }
    }

    /// Keep a background task so `close` can stop it. A task registered after
    /// close has started is aborted on the spot.
    fn track(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
        if self.is_closed() {
            self.abort_tasks();
        }
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl<P: Pool> Drop for ConnectionManager<P> {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl<P: Pool> Shared<P> {
    async fn health_check(&self) -> HealthStatus {
        let timeout = self.config.health_check_timeout;
        let start = Instant::now();

        // Ping without holding the lock
        let result = if self.closed.load(Ordering::Acquire) {
            Err(DatabaseError::Closed)
        } else {
            match tokio::time::timeout(timeout, self.pool.ping()).await {
                Ok(result) => result,
                Err(_) => Err(DatabaseError::Timeout(timeout)),
            }
        };
        let elapsed = start.elapsed();

        let mut state = self.health.write().await;
        // A probe that outlived close must not overwrite the closed status
        if self.closed.load(Ordering::Acquire) {
            state.status.is_healthy = false;
            state.status.last_error = Some(DatabaseError::Closed.to_string());
            return state.status.clone();
        }
        let was_healthy = state.status.is_healthy;
        state.status.is_healthy = result.is_ok();
        state.status.last_check = Some(Utc::now());
        state.status.last_error = result.as_ref().err().map(|e| e.to_string());
        state.status.response_time = elapsed;
        state.checked_at = Some(Instant::now());
        let snapshot = state.status.clone();
        drop(state);

        match result {
            Ok(()) if !was_healthy => {
                info!(response_time_ms = elapsed.as_millis() as u64, "Database health restored");
            }
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, response_time_ms = elapsed.as_millis() as u64, "Database health check failed");
                // Only the healthy -> unhealthy transition goes to the reporter
                if was_healthy {
                    self.reporter.capture(Report::new("database_health_check", &e));
                }
            }
        }

        snapshot
    }

    /// Current status and whether it is older than the cache window.
    async fn cached_health(&self) -> (HealthStatus, bool) {
        let state = self.health.read().await;
        let fresh = state
            .checked_at
            .map(|at| at.elapsed() < self.config.health_cache_ttl)
            .unwrap_or(false);
        (state.status.clone(), !fresh)
    }

    async fn update_metrics(&self) -> Result<ConnectionMetrics, DatabaseError> {
        let stats = self.pool.stats()?;
        let metrics = ConnectionMetrics::from_stats(stats, &self.config);
        *self.metrics.write().await = metrics.clone();
        Ok(metrics)
    }
}

fn spawn_health_loop<P: Pool>(shared: Arc<Shared<P>>) -> JoinHandle<()> {
    let period = shared.config.health_check_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            shared.health_check().await;
        }
    })
}

fn spawn_metrics_loop<P: Pool>(shared: Arc<Shared<P>>) -> JoinHandle<()> {
    let period = shared.config.metrics_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = shared.update_metrics().await {
                error!(error = %e, "Failed to collect connection metrics");
            }
        }
    })
}
