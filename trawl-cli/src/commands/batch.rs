//! Batch command handlers
//!
//! Handles listing, inspection and the control operations that do not
//! need to stay in the foreground.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;
use trawl_core::domain::extraction::Row;
use trawl_core::domain::job::BatchJob;

use super::display::{colorize_status, print_batch_details, print_batch_summary};
use crate::id_resolver::resolve_batch_id;
use crate::session::Session;

#[derive(Serialize)]
struct ExportedPage<'a> {
    url: &'a str,
    rows: &'a [Row],
}

/// List all batches
pub async fn list_batches(session: &Session) -> Result<()> {
    let jobs = session.store.list_jobs().await?;

    if jobs.is_empty() {
        println!("{}", "No batches found.".yellow());
    } else {
        println!("{}", format!("Found {} batch(es):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_batch_summary(&job);
        }
    }

    Ok(())
}

/// Get and display a single batch
pub async fn get_batch(session: &Session, id: &str) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;
    let job = session.store.require_job(uuid).await?;

    print_batch_details(&job);

    Ok(())
}

pub async fn pause_batch(session: &Session, id: &str) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;
    let job = session.controller.pause_batch(uuid).await?;

    print_status_change("Paused", &job);
    Ok(())
}

pub async fn resume_batch(session: &Session, id: &str) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;
    let job = session.controller.resume_batch(uuid).await?;

    print_status_change("Resumed", &job);
    println!(
        "{}",
        format!("  drive it in the foreground with `trawl attach {}`", uuid).dimmed()
    );
    Ok(())
}

pub async fn cancel_batch(session: &Session, id: &str) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;
    let job = session.controller.cancel_batch(uuid).await?;

    // In-flight pages of this process settle as cancelled
    if session.controller.is_scheduling(uuid) {
        session.controller.wait_for_batch(uuid).await?;
    }

    print_status_change("Cancelled", &job);
    Ok(())
}

pub async fn delete_batch(session: &Session, id: &str) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;

    if session.controller.delete_batch(uuid).await? {
        println!("{} Deleted batch {}", "✓".green(), uuid.to_string().cyan());
    } else {
        println!("{}", format!("Batch {} was already gone", uuid).yellow());
    }

    Ok(())
}

pub async fn rename_batch(session: &Session, id: &str, name: &str) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;
    let job = session.controller.update_batch_name(uuid, name).await?;

    println!(
        "{} Renamed batch {} to {}",
        "✓".green(),
        uuid.to_string().cyan(),
        job.name.bold()
    );
    Ok(())
}

/// Write the rows of every completed URL as a JSON array
pub async fn export_batch(session: &Session, id: &str, output: Option<PathBuf>) -> Result<()> {
    let uuid = resolve_batch_id(&session.store, id).await?;
    let job = session.store.require_job(uuid).await?;

    let pages: Vec<ExportedPage<'_>> = job
        .results()
        .into_iter()
        .map(|(url, rows)| ExportedPage { url, rows })
        .collect();
    let json = serde_json::to_string_pretty(&pages)?;

    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} Exported {} row(s) from {} page(s) to {}",
                "✓".green(),
                job.statistics.total_rows,
                pages.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Run one cleanup pass
pub async fn sweep(session: &Session) -> Result<()> {
    let report = session.controller.run_sweep().await?;

    println!("{}", "Sweep finished:".bold());
    println!("  Recovered tasks:   {}", report.recovered);
    println!("  Reclaimed batches: {}", report.reclaimed);
    Ok(())
}

fn print_status_change(verb: &str, job: &BatchJob) {
    println!(
        "{} {} batch {} (now {})",
        "✓".green(),
        verb,
        job.id.to_string().cyan(),
        colorize_status(job.status)
    );
}
