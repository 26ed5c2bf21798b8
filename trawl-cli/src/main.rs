//! Trawl CLI
//!
//! Command-line interface for running and steering scrape batches.

mod commands;
mod config;
mod driver;
mod id_resolver;
mod session;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "trawl")]
#[command(about = "Batch scraper for lists of URLs", long_about = None)]
struct Cli {
    /// Database holding the batches
    #[arg(long, env = "TRAWL_DATABASE_URL", default_value = "sqlite://trawl.db")]
    database_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trawl_cli=info,trawl_runner=info,trawl_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.database_url)?;

    handle_command(cli.command, &config).await
}
