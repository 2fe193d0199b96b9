#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pgwatch_api::config::DatabaseConfig;
use pgwatch_api::database::{ConnectionManager, Connector, DatabaseError, Pool, PoolStats};
use pgwatch_api::monitoring::{ErrorReporter, MemoryReporter};

#[derive(Debug, Default)]
struct FakeState {
    pings: AtomicUsize,
    closes: AtomicUsize,
    failing: AtomicBool,
    close_fails: AtomicBool,
    stats_fail: AtomicBool,
    ping_delay_ms: AtomicU64,
    stats: Mutex<PoolStats>,
}

/// In-memory pool whose behaviour tests flip at runtime.
#[derive(Debug, Default, Clone)]
pub struct FakePool {
    state: Arc<FakeState>,
}

impl FakePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_close_fails(&self, fails: bool) {
        self.state.close_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_stats_fail(&self, fails: bool) {
        self.state.stats_fail.store(fails, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        self.state.ping_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_stats(&self, stats: PoolStats) {
        *self.state.stats.lock().unwrap() = stats;
    }
}

#[async_trait]
impl Pool for FakePool {
    async fn ping(&self) -> Result<(), DatabaseError> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.ping_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.state.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionError("connection reset by peer".into()));
        }
        Ok(())
    }

    fn stats(&self) -> Result<PoolStats, DatabaseError> {
        if self.state.stats_fail.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionError("stats unavailable".into()));
        }
        Ok(*self.state.stats.lock().unwrap())
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.close_fails.load(Ordering::SeqCst) {
            return Err(DatabaseError::ConnectionError("close failed".into()));
        }
        Ok(())
    }
}

/// Refuses the first `fail_first` connects, then hands out the shared pool.
pub struct FakeConnector {
    pub pool: FakePool,
    fail_first: usize,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn healthy() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            pool: FakePool::new(),
            fail_first,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Pool = FakePool;

    async fn connect(&self, _config: &DatabaseConfig) -> Result<FakePool, DatabaseError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.fail_first {
            return Err(DatabaseError::ConnectionError(format!(
                "connection refused (attempt {attempt})"
            )));
        }
        Ok(self.pool.clone())
    }
}

pub fn test_config() -> DatabaseConfig {
    DatabaseConfig {
        retry_attempts: 3,
        retry_delay: Duration::from_secs(1),
        ..DatabaseConfig::default()
    }
}

pub fn reporter() -> (MemoryReporter, Arc<dyn ErrorReporter>) {
    let memory = MemoryReporter::new();
    let shared: Arc<dyn ErrorReporter> = Arc::new(memory.clone());
    (memory, shared)
}

/// Connect a manager over a healthy fake pool with the given config.
pub async fn connected(config: DatabaseConfig) -> (ConnectionManager<FakePool>, FakePool, MemoryReporter) {
    let connector = FakeConnector::healthy();
    let (memory, reporter) = reporter();
    let manager = ConnectionManager::connect(&connector, config, reporter)
        .await
        .expect("fake connector should connect");
    (manager, connector.pool.clone(), memory)
}
