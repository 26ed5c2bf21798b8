//! Cleanup sweep
//!
//! Periodically recovers `running` tasks that lost their tab (or their
//! scheduler) and reclaims expired ephemeral jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trawl_core::domain::job::{BatchJob, JobStatus};
use trawl_core::domain::task::{TabId, TaskPatch, TaskStatus};
use trawl_core::{BatchError, Result};
use trawl_store::JobStore;
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::leases::TaskLeases;
use crate::tabs::HiddenTabManager;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orphaned running tasks sent back through the failure path
    pub recovered: usize,
    /// Ephemeral jobs deleted
    pub reclaimed: usize,
}

pub struct CleanupSweep {
    store: Arc<JobStore>,
    tabs: Arc<HiddenTabManager>,
    leases: TaskLeases,
    config: RunnerConfig,
}

impl CleanupSweep {
    pub fn new(
        store: Arc<JobStore>,
        tabs: Arc<HiddenTabManager>,
        leases: TaskLeases,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            tabs,
            leases,
            config,
        }
    }

    /// Runs one pass over every stored job
    pub async fn run_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        for job in self.store.list_jobs().await? {
            if self.reclaim_if_expired(&job).await? {
                report.reclaimed += 1;
                continue;
            }

            for task in job.tasks_in_order() {
                if task.status != TaskStatus::Running || self.leases.is_leased(job.id, &task.url) {
                    continue;
                }

                let tab_alive = match task.tab_id {
                    Some(tab_id) => self.tabs.tab_exists(tab_id).await?,
                    None => false,
                };
                if tab_alive {
                    continue;
                }

                match recover_orphan(&self.store, &self.leases, job.id, &task.url, task.tab_id).await {
                    Ok(status) => {
                        info!(
                            "Recovered orphaned task {} of job {} -> {:?}",
                            task.url, job.id, status
                        );
                        report.recovered += 1;
                    }
                    Err(e) if e.is_conflict() => {
                        debug!("Task {} of job {} moved during sweep", task.url, job.id);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        if report != SweepReport::default() {
            info!(
                "Cleanup sweep recovered {} task(s), reclaimed {} job(s)",
                report.recovered, report.reclaimed
            );
        }
        Ok(report)
    }

    /// Runs `run_once` every `interval` until the handle is aborted
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Starting cleanup sweep (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    error!("Cleanup sweep failed: {}", e);
                }
            }
        })
    }

    async fn reclaim_if_expired(&self, job: &BatchJob) -> Result<bool> {
        let Some(origin_tab) = job.origin_tab else {
            return Ok(false);
        };

        let age = (Utc::now() - job.created_at).to_std().unwrap_or(Duration::ZERO);
        if age < self.config.ephemeral_retention {
            return Ok(false);
        }
        if self.leases.count_for(job.id) > 0 || self.tabs.tab_exists(origin_tab).await? {
            return Ok(false);
        }

        info!(
            "Reclaiming ephemeral job {} (origin {} gone, age {:?})",
            job.id, origin_tab, age
        );
        self.store.delete_job(job.id).await
    }
}

/// Sends an ownerless `running` task back through the failure path
///
/// The lost attempt counts as a load timeout. Tasks of a cancelled job are
/// cancelled instead. Ownership and the tab are re-checked against the
/// committed record, so a task that was re-admitted after `observed_tab`
/// was checked is left alone with a `Conflict`.
pub async fn recover_orphan(
    store: &JobStore,
    leases: &TaskLeases,
    job_id: Uuid,
    url: &str,
    observed_tab: Option<TabId>,
) -> Result<TaskStatus> {
    let job = store
        .transition_task_with(job_id, url, &[TaskStatus::Running], |job, task| {
            if leases.is_leased(job.id, url) {
                return Err(BatchError::conflict(format!("owner of task {}", url), "none", "a live scheduler"));
            }
            if task.tab_id != observed_tab {
                return Err(BatchError::conflict(format!("tab of task {}", url), observed_tab, task.tab_id));
            }

            if job.status == JobStatus::Cancelled {
                return Ok((TaskStatus::Cancelled, TaskPatch::default()));
            }
            let attempt = task.attempt + 1;
            if attempt <= job.settings.max_retries {
                Ok((TaskStatus::Pending, TaskPatch::attempt(attempt)))
            } else {
                Ok((
                    TaskStatus::Failed,
                    TaskPatch::failure("page load never completed: tab lost", attempt),
                ))
            }
        })
        .await?;

    let status = job.task(url).map(|task| task.status).unwrap_or(TaskStatus::Failed);
    if status == TaskStatus::Failed {
        warn!("Orphaned task {} of job {} exhausted its retries", url, job_id);
    }
    Ok(status)
}
