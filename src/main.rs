//! Praxis — a self-improving goal-execution engine.
//!
//! Entry point: parses CLI arguments, initializes structured logging,
//! and dispatches into one of `ask`/`demo`/`serve`/`status` (§6).

mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = cli::Cli::parse();
    let exit_code = cli::run(args).await;
    std::process::exit(exit_code);
}
