//! agwarden - SQL Server Always On Availability Group administration.
//!
//! Discovers groups from seed servers, reports replica and database health,
//! performs guarded failovers and keeps the cluster core group with the
//! primary.

mod ag;
mod cli;
mod cluster;
mod config;
mod prompt;
mod report;
mod sql;
mod web;

#[cfg(test)]
mod testutil;

use clap::Parser;
use cli::Cli;
use config::AppConfig;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // Initialize logging; logs go to stderr so stdout stays machine-readable
    let level = if cli.verbose { "agwarden=debug" } else { "agwarden=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    // Load configuration
    let mut cfg = AppConfig::load();
    cli.connection.apply(&mut cfg);
    cfg.validate()?;
    tracing::debug!(
        "Command timeout {}s, connect timeout {}s, multi-subnet failover {}",
        cfg.command_timeout_secs,
        cfg.connect_timeout_secs,
        cfg.multi_subnet_failover
    );

    cli::run(cli.command, cfg).await
}
