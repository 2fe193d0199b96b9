use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::database::pool::PoolStats;

/// Liveness of the database connection as of the last probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(rename = "response_time_ms", serialize_with = "as_millis")]
    pub response_time: Duration,
    pub retry_count: u32,
}

/// Pool utilization snapshot plus the configured bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    pub total_connections: u32,
    pub open_connections: u32,
    pub idle_connections: u32,
    pub in_use_connections: u32,
    pub wait_count: u64,
    #[serde(rename = "wait_duration_ms", serialize_with = "as_millis")]
    pub wait_duration: Duration,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
}

impl ConnectionMetrics {
    pub fn from_stats(stats: PoolStats, config: &DatabaseConfig) -> Self {
        Self {
            total_connections: stats.open,
            open_connections: stats.open,
            idle_connections: stats.idle,
            in_use_connections: stats.in_use,
            wait_count: stats.wait_count,
            wait_duration: stats.wait_duration,
            max_open_connections: config.max_open_connections,
            max_idle_connections: config.max_idle_connections,
        }
    }
}

fn as_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metrics_take_bounds_from_config() {
        let config = DatabaseConfig {
            max_open_connections: 40,
            max_idle_connections: 7,
            ..DatabaseConfig::default()
        };
        let stats = PoolStats { open: 4, idle: 1, in_use: 3, wait_count: 2, wait_duration: Duration::from_millis(1500) };
        let m = ConnectionMetrics::from_stats(stats, &config);
        assert_eq!(m.total_connections, 4);
        assert_eq!(m.in_use_connections, 3);
        assert_eq!(m.max_open_connections, 40);
        assert_eq!(m.max_idle_connections, 7);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let status = HealthStatus {
            is_healthy: false,
            last_check: None,
            last_error: Some("connection refused".into()),
            response_time: Duration::from_millis(42),
            retry_count: 0,
        };
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["response_time_ms"], json!(42));
        assert_eq!(v["last_error"], json!("connection refused"));
        assert!(v["last_check"].is_null());
    }
}
