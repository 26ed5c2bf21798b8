//! Foreground batch commands
//!
//! `run` creates a batch and drives it; `attach` takes over an existing
//! one. Both stream progress until the batch settles. Ctrl-C pauses the
//! batch so it can be attached again later.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;
use trawl_core::domain::extraction::{ColumnDefinition, ExtractionConfig};
use trawl_core::domain::settings::BatchSettings;
use trawl_core::dto::batch::CreateBatch;
use trawl_store::{JobChange, JobEvent};
use uuid::Uuid;

use super::display::{colorize_status, progress_line};
use crate::id_resolver::resolve_batch_id;
use crate::session::Session;

#[derive(Args)]
pub struct RunArgs {
    /// Target URL (repeatable)
    #[arg(short, long = "url")]
    urls: Vec<String>,

    /// File with one URL per line
    #[arg(long)]
    urls_file: Option<PathBuf>,

    /// JSON extraction config (`containerSelector` + `columns`)
    #[arg(short, long, conflicts_with_all = ["container", "columns"])]
    config: Option<PathBuf>,

    /// Container selector; one row per match
    #[arg(long)]
    container: Option<String>,

    /// Column as `name=selector` or `name=selector@attribute` (repeatable)
    #[arg(long = "column")]
    columns: Vec<String>,

    /// Batch name
    #[arg(short, long, default_value = "")]
    name: String,

    /// Pages processed at the same time
    #[arg(long, default_value_t = BatchSettings::default().max_concurrency)]
    concurrency: u32,

    /// Minimum delay between opening two pages, in milliseconds
    #[arg(long, default_value_t = BatchSettings::default().delay_between_requests_ms)]
    delay_ms: u64,

    /// Retries per URL after the first attempt
    #[arg(long, default_value_t = BatchSettings::default().max_retries)]
    retries: u32,

    /// Ask the browser not to run page scripts
    #[arg(long)]
    no_js: bool,
}

impl RunArgs {
    fn into_request(self) -> Result<CreateBatch> {
        let mut urls = self.urls;
        if let Some(path) = &self.urls_file {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            urls.extend(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string),
            );
        }
        if urls.is_empty() {
            bail!("No URLs given; use --url or --urls-file");
        }

        let config = match (&self.config, self.container) {
            (Some(path), _) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("Invalid extraction config in {}", path.display()))?
            }
            (None, Some(container)) => ExtractionConfig {
                container_selector: container,
                columns: self
                    .columns
                    .iter()
                    .map(|column| parse_column(column))
                    .collect::<Result<_>>()?,
            },
            (None, None) => bail!("Give either --config or --container with --column"),
        };

        Ok(CreateBatch {
            urls,
            config,
            settings: BatchSettings {
                max_concurrency: self.concurrency,
                delay_between_requests_ms: self.delay_ms,
                max_retries: self.retries,
                disable_js_rendering: self.no_js,
            },
            name: self.name,
            origin_tab: None,
        })
    }
}

/// Parses `name=selector[@attribute]`
fn parse_column(raw: &str) -> Result<ColumnDefinition> {
    let Some((name, rest)) = raw.split_once('=') else {
        bail!("Column '{}' must look like name=selector[@attribute]", raw);
    };

    let (selector, attribute) = match rest.rsplit_once('@') {
        Some((selector, attribute)) if !attribute.is_empty() => {
            (selector, Some(attribute.trim().to_string()))
        }
        _ => (rest, None),
    };

    Ok(ColumnDefinition {
        name: name.trim().to_string(),
        selector: selector.trim().to_string(),
        attribute,
    })
}

pub async fn run_batch(session: &Session, args: RunArgs) -> Result<()> {
    let request = args.into_request()?;
    let job = session.controller.create_and_start_batch(request).await?;

    println!(
        "{} Started batch {} ({} URL(s))",
        "✓".green(),
        job.id.to_string().cyan(),
        job.urls.len()
    );
    println!("{}", format!("  name: {}", job.name).dimmed());

    follow(session, job.id).await
}

pub async fn attach_batch(session: &Session, id: &str) -> Result<()> {
    let job_id = resolve_batch_id(&session.store, id).await?;
    let job = session.controller.drive_batch(job_id).await?;

    if job.status.is_terminal() && !session.controller.is_scheduling(job_id) {
        println!("Batch {} is already {}", job_id, colorize_status(job.status));
        return Ok(());
    }

    println!("{} Attached to batch {}", "✓".green(), job_id.to_string().cyan());
    follow(session, job_id).await
}

/// Streams progress until the batch settles or the user interrupts
async fn follow(session: &Session, job_id: Uuid) -> Result<()> {
    let _subscription = session.controller.subscribe_batch(job_id, |event| match event {
        JobEvent::Updated {
            change: JobChange::Task { url, to, .. },
            job,
        } => {
            println!("  {:<9} {}  {}", format!("{:?}", to).dimmed(), url, progress_line(&job.statistics));
        }
        JobEvent::Updated {
            change: JobChange::Status { to, .. },
            ..
        } => println!("  batch is now {}", colorize_status(to)),
        JobEvent::Failure { message, .. } => {
            eprintln!("{} {}", "⚠ Batch failure:".yellow(), message);
        }
        _ => {}
    });

    let sweeper = session.controller.spawn_sweeper();
    let outcome = tokio::select! {
        job = session.controller.wait_for_batch(job_id) => job.map(|job| {
            println!();
            println!(
                "Batch {} {}: {}",
                job.id.to_string().cyan(),
                colorize_status(job.status),
                progress_line(&job.statistics)
            );
            println!("  {} row(s) extracted", job.statistics.total_rows);
        }).map_err(anyhow::Error::from),
        interrupted = tokio::signal::ctrl_c() => match interrupted {
            Ok(()) => {
                eprintln!();
                match session.controller.pause_batch(job_id).await {
                    Ok(_) => eprintln!(
                        "{} Batch paused; continue with `trawl attach {}`",
                        "⏸".yellow(),
                        job_id
                    ),
                    Err(e) => eprintln!("{} Failed to pause batch: {}", "✗".red(), e),
                }
                Ok(())
            }
            Err(e) => Err(anyhow::Error::new(e).context("Failed to listen for Ctrl-C")),
        },
    };

    sweeper.abort();
    outcome
}
