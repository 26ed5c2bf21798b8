//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod batch;
mod display;
mod run;

pub use run::RunArgs;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;
use crate::session::Session;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a batch and drive it to completion
    Run(RunArgs),
    /// Drive an existing batch in the foreground (resumes it if paused)
    Attach {
        /// Batch ID or unambiguous prefix
        id: String,
    },
    /// List all batches
    List,
    /// Show batch details and per-URL status
    Get {
        /// Batch ID or unambiguous prefix
        id: String,
    },
    /// Stop admitting new URLs; in-flight pages finish
    Pause { id: String },
    /// Resume a paused batch (drive it with `attach`)
    Resume { id: String },
    /// Cancel a batch
    Cancel { id: String },
    /// Delete a batch, cancelling it first if needed
    Delete { id: String },
    /// Rename a batch
    Rename {
        id: String,
        /// New name; empty picks a timestamped default
        name: String,
    },
    /// Write extracted rows as JSON
    Export {
        id: String,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<std::path::PathBuf>,
    },
    /// Recover orphaned tasks and reclaim expired ephemeral batches
    Sweep,
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let session = Session::open(config).await?;

    match command {
        Commands::Run(args) => run::run_batch(&session, args).await,
        Commands::Attach { id } => run::attach_batch(&session, &id).await,
        Commands::List => batch::list_batches(&session).await,
        Commands::Get { id } => batch::get_batch(&session, &id).await,
        Commands::Pause { id } => batch::pause_batch(&session, &id).await,
        Commands::Resume { id } => batch::resume_batch(&session, &id).await,
        Commands::Cancel { id } => batch::cancel_batch(&session, &id).await,
        Commands::Delete { id } => batch::delete_batch(&session, &id).await,
        Commands::Rename { id, name } => batch::rename_batch(&session, &id, &name).await,
        Commands::Export { id, output } => batch::export_batch(&session, &id, output).await,
        Commands::Sweep => batch::sweep(&session).await,
    }
}
