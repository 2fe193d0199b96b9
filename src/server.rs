use anyhow::Context;
use axum::{http::HeaderValue, routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::config::{AppConfig, ServerConfig};
use crate::database::{ConnectionManager, Pool};
use crate::handlers;

pub fn app<P: Pool>(manager: Arc<ConnectionManager<P>>, server: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(handlers::liveness))
        .route("/health/database", get(handlers::database_health::<P>))
        .route("/health/metrics", get(handlers::pool_metrics::<P>))
        .fallback(handlers::not_found)
        .with_state(manager)
        // Global middleware
        .layer(cors_layer(&server.cors_origins))
        .layer(TimeoutLayer::new(server.request_timeout))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
}

/// Serve until ctrl-c / SIGTERM, then close the database connection. A close
/// failure is logged and not retried.
pub async fn serve<P: Pool>(config: &AppConfig, manager: Arc<ConnectionManager<P>>) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    info!("HTTP server listening on http://{}", bind_addr);

    let router = app(Arc::clone(&manager), &config.server);
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Shutting down HTTP server...");
    if let Err(e) = manager.close().await {
        error!(error = %e, "Database shutdown error");
    }

    served.context("HTTP server error")?;
    info!("Server shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
