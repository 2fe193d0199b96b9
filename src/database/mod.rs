pub mod manager;
pub mod pool;
pub mod postgres;
pub mod status;

pub use manager::{ConnectionManager, DatabaseError};
pub use pool::{Connector, Pool, PoolStats};
pub use postgres::{PgBackend, PgConnector};
pub use status::{ConnectionMetrics, HealthStatus};
