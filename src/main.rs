//! TailSync - clipboard synchronization relay and client
//!
//! Entry point for the `tailsync` binary.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tailsync::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tailsync={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("TailSync v{}", tailsync::VERSION);

    cli::run(cli).await
}
