use async_trait::async_trait;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::database::manager::DatabaseError;

/// Raw counters read from a connection pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub open: u32,
    pub idle: u32,
    pub in_use: u32,
    pub wait_count: u64,
    pub wait_duration: Duration,
}

/// A live connection pool supervised by the `ConnectionManager`.
///
/// Implementations must be safe to share across tasks; the manager calls
/// `ping` and `stats` from background loops while callers use the pool.
#[async_trait]
pub trait Pool: Send + Sync + 'static {
    /// Minimal round trip proving the database answers.
    async fn ping(&self) -> Result<(), DatabaseError>;

    fn stats(&self) -> Result<PoolStats, DatabaseError>;

    async fn close(&self) -> Result<(), DatabaseError>;
}

/// Opens a pool with the configured bounds applied.
#[async_trait]
pub trait Connector: Send + Sync {
    type Pool: Pool;

    async fn connect(&self, config: &DatabaseConfig) -> Result<Self::Pool, DatabaseError>;
}
