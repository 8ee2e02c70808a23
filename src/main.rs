//! riskguard - personal futures risk-enforcement daemon
//!
//! Consumes per-account events and market quotes from the brokerage hubs,
//! evaluates the configured risk rules, and drives remediation against the
//! REST trading gateway. Headless: structured logs to stdout, metrics pushed
//! as `METRICS_JSON:` lines, no listening sockets.
//!
//! # Usage
//! ```sh
//! API_BASE_URL=https://gateway.example.com \
//! HUB_BASE_URL=wss://gateway.example.com \
//! riskguard --accounts config/accounts.yaml --rules config/rules.yaml
//! ```
//!
//! # Environment Variables
//! - `API_BASE_URL` / `HUB_BASE_URL` - gateway endpoints (required)
//! - `DATABASE_URL` - sqlite path (default: sqlite://data/riskguard.db)
//! - `EXECUTOR_WORKERS` - cross-account enforcement concurrency (default 4)
//! - `SHUTDOWN_GRACE_SECS` - in-flight remediation grace (default 5)
//! - `LOG_LEVEL` / `RUST_LOG` - log filtering

use anyhow::Result;
use clap::Parser;
use riskguard::application::system::{Application, log_startup_summary};
use riskguard::config::Config;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "riskguard", version, about = "futures risk-enforcement daemon")]
struct Cli {
    /// Accounts YAML file (default: config/accounts.yaml or $ACCOUNTS_FILE)
    #[arg(long)]
    accounts: Option<PathBuf>,
    /// Rules YAML file (default: config/rules.yaml or $RULES_FILE)
    #[arg(long)]
    rules: Option<PathBuf>,
    /// Holidays YAML file (default: config/holidays.yaml or $HOLIDAYS_FILE)
    #[arg(long)]
    holidays: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse().ok())
        .map(|level: Level| {
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())
        })
        .unwrap_or_else(|| {
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into())
        });
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();

    info!("riskguard {} starting...", env!("CARGO_PKG_VERSION"));

    // Invalid configuration refuses to start; every error names the account
    // and field at fault.
    let config = Config::load(cli.accounts, cli.rules, cli.holidays)?;
    log_startup_summary(&config);

    let app = Application::build(config).await?;
    app.run().await
}
