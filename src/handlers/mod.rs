pub mod health;

pub use health::{database_health, liveness, pool_metrics};

use crate::error::ApiError;

/// Fallback for unmatched routes.
pub async fn not_found(uri: axum::http::Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}
