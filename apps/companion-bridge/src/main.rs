mod cli;
mod config;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::{cli::Cli, config::AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env();
    init_tracing(cfg.log_filter.as_deref());

    let cli = Cli::parse();
    cli::run(cli, cfg).await
}

/// RUST_LOG wins, then COMPANION_LOG_FILTER, then `info`. Logs go to stderr so
/// command output on stdout stays machine readable.
fn init_tracing(configured: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| configured.and_then(|directives| EnvFilter::try_new(directives).ok()))
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
