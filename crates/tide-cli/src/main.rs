//! `tide-vllm` entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tide_cli::{Cli, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before parsing so `.env` can fill flags
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose switches to debug
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    run(cli).await
}
