use clap::Parser;
use pgwatch_api::cli::Cli;
use pgwatch_api::config::AppConfig;

#[tokio::main]
async fn main() {
    // Load .env if present so cargo run picks up DATABASE_URL, DB_*, etc.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let (config, warnings) = AppConfig::from_env();
    pgwatch_api::logging::init(&config.logging);
    for warning in &warnings {
        tracing::warn!(key = warning.key, value = %warning.value, "{warning}");
    }

    if let Err(e) = pgwatch_api::cli::run(cli, config).await {
        tracing::error!("{e:#}");
        std::process::exit(1);
    }
}
