// handlers/health.rs - GET /health, /health/database, /health/metrics
//
// The database endpoints always answer 200 while the manager is open; an
// unreachable database shows up as `is_healthy: false` in the body.

use axum::extract::{Query, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::{ApiResponse, ApiResult};
use crate::database::{ConnectionManager, ConnectionMetrics, HealthStatus, Pool};

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    /// Bypass the cache and probe or poll right now.
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct Liveness {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub status: &'static str,
    #[serde(flatten)]
    pub health: HealthStatus,
}

impl From<HealthStatus> for DatabaseHealth {
    fn from(health: HealthStatus) -> Self {
        let status = if health.is_healthy { "healthy" } else { "unhealthy" };
        Self { status, health }
    }
}

/// Process liveness; does not touch the database.
pub async fn liveness() -> ApiResponse<Liveness> {
    ApiResponse::success(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

pub async fn database_health<P: Pool>(
    State(manager): State<Arc<ConnectionManager<P>>>,
    Query(query): Query<RefreshQuery>,
) -> ApiResponse<DatabaseHealth> {
    let health = if query.refresh {
        manager.health_check().await
    } else {
        manager.fast_health_check().await
    };

    if !health.is_healthy {
        tracing::debug!(error = ?health.last_error, "Reporting unhealthy database");
    }
    ApiResponse::success(health.into())
}

pub async fn pool_metrics<P: Pool>(
    State(manager): State<Arc<ConnectionManager<P>>>,
    Query(query): Query<RefreshQuery>,
) -> ApiResult<ConnectionMetrics> {
    let metrics = if query.refresh {
        manager.refresh_metrics().await?
    } else {
        manager.metrics().await
    };
    Ok(ApiResponse::success(metrics))
}
