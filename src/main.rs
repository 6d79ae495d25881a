//! advisors CLI entrypoint

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use advisors::cli::{log_directive, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `run --json` output stays clean
    let directive = log_directive(
        std::env::var("ADVISORS_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
    );
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    Cli::parse().execute().await
}
