//! Terminal rendering of batches

use colored::*;
use trawl_core::domain::job::{BatchJob, JobStatus};
use trawl_core::domain::statistics::BatchStatistics;
use trawl_core::domain::task::TaskStatus;

/// Print a one-batch summary for listings
pub fn print_batch_summary(job: &BatchJob) {
    println!("  {} {} {}", "▸".cyan(), job.name.bold(), job.id.to_string().dimmed());
    println!("    Status:   {}", colorize_status(job.status));
    println!("    Progress: {}", progress_line(&job.statistics));
    println!(
        "    Created:  {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed()
    );
    println!();
}

/// Print detailed batch information
pub fn print_batch_details(job: &BatchJob) {
    println!("{}", "Batch Details:".bold());
    println!("  ID:          {}", job.id.to_string().cyan());
    println!("  Name:        {}", job.name);
    println!("  Status:      {}", colorize_status(job.status));
    println!("  Created:     {}", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("  Updated:     {}", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(tab) = job.origin_tab {
        println!("  Origin:      {}", tab);
    }

    println!("\n{}", "Settings:".bold());
    println!("  Concurrency: {}", job.settings.max_concurrency);
    println!("  Delay:       {}ms", job.settings.delay_between_requests_ms);
    println!("  Retries:     {}", job.settings.max_retries);
    println!("  JavaScript:  {}", if job.settings.disable_js_rendering { "off" } else { "on" });

    println!("\n{}", "Extraction:".bold());
    println!("  Container:   {}", job.config.container_selector.cyan());
    for column in &job.config.columns {
        let target = if column.selector.is_empty() { "." } else { column.selector.as_str() };
        match &column.attribute {
            Some(attribute) => println!("  {} = {} @{}", column.name.cyan(), target, attribute),
            None => println!("  {} = {}", column.name.cyan(), target),
        }
    }

    println!("\n{}", "Progress:".bold());
    println!("  {}", progress_line(&job.statistics));
    for status in TaskStatus::ALL {
        println!(
            "  {:<12} {}",
            format!("{:?}:", status),
            job.statistics.count(status)
        );
    }
    println!("  Rows:        {}", job.statistics.total_rows);

    println!("\n{}", "URLs:".bold());
    for task in job.tasks_in_order() {
        let detail = match task.status {
            TaskStatus::Completed => format!("{} row(s)", task.row_count()).dimmed(),
            TaskStatus::Failed => task.error.clone().unwrap_or_default().red(),
            _ => "".normal(),
        };
        println!(
            "  {:<10} {} {} {}",
            colorize_task_status(task.status),
            task.url,
            format!("(attempts: {})", task.attempt).dimmed(),
            detail
        );
    }
}

/// Compact `done/total` line with per-status counts
pub fn progress_line(stats: &BatchStatistics) -> String {
    let done = stats.completed + stats.failed + stats.cancelled;
    format!(
        "{}/{} done ({} ok, {} failed, {} running, {} pending)",
        done,
        stats.total,
        stats.completed.to_string().green(),
        stats.failed.to_string().red(),
        stats.running.to_string().cyan(),
        stats.pending.to_string().yellow(),
    )
}

/// Colorize batch status for display
pub fn colorize_status(status: JobStatus) -> ColoredString {
    let status_str = format!("{:?}", status);
    match status {
        JobStatus::Pending => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Paused => status_str.magenta(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Cancelled => status_str.dimmed(),
    }
}

fn colorize_task_status(status: TaskStatus) -> ColoredString {
    let status_str = format!("{:?}", status);
    match status {
        TaskStatus::Pending => status_str.yellow(),
        TaskStatus::Running => status_str.cyan(),
        TaskStatus::Completed => status_str.green(),
        TaskStatus::Failed => status_str.red(),
        TaskStatus::Cancelled => status_str.dimmed(),
    }
}
