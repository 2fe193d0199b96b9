use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::{ConnectionManager, PgConnector};
use crate::monitoring::{CompositeReporter, ErrorReporter, MemoryReporter, TracingReporter};
use crate::server;

#[derive(Parser)]
#[command(name = "pgwatch-api")]
#[command(about = "HTTP service with a supervised PostgreSQL connection")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Connect to the database and serve HTTP (default)")]
    Serve,

    #[command(about = "Connect once, probe the database, print health and pool metrics as JSON")]
    Check,
}

pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Check => check(config).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        environment = ?config.environment,
        database = %config.database.redacted_connection_string(),
        "Starting pgwatch-api"
    );

    let reporter: Arc<dyn ErrorReporter> = Arc::new(TracingReporter);
    let manager = ConnectionManager::connect(&PgConnector, config.database.clone(), reporter)
        .await
        .context("failed to initialize database manager")?;

    server::serve(&config, Arc::new(manager)).await
}

async fn check(config: AppConfig) -> anyhow::Result<()> {
    let attempts = MemoryReporter::new();
    let sinks: Vec<Arc<dyn ErrorReporter>> = vec![Arc::new(TracingReporter), Arc::new(attempts.clone())];
    let reporter: Arc<dyn ErrorReporter> = Arc::new(CompositeReporter::new(sinks));

    let manager = match ConnectionManager::connect(&PgConnector, config.database.clone(), reporter).await {
        Ok(manager) => manager,
        Err(e) => {
            for report in attempts.reports() {
                eprintln!(
                    "attempt {}: {}",
                    report.get_tag("attempt").unwrap_or("?"),
                    report.message
                );
            }
            return Err(e).context("database unreachable");
        }
    };

    let health = manager.health_check().await;
    let metrics = manager.refresh_metrics().await.unwrap_or_default();
    if let Err(e) = manager.close().await {
        tracing::warn!(error = %e, "Failed to close database connection");
    }

    let output = json!({ "health": health, "metrics": metrics });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !health.is_healthy {
        anyhow::bail!(
            "database unhealthy: {}",
            health.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
