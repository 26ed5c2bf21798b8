//! Batch scheduler
//!
//! One scheduler drives one job. It admits pending tasks in URL-list order
//! up to `maxConcurrency`, paces admissions, runs each attempt through the
//! hidden tab manager and the extraction bridge, and settles the outcome
//! through the job store. All attempts of a job are polled cooperatively
//! from the scheduler's own task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use trawl_core::domain::extraction::{ExtractionConfig, Row};
use trawl_core::domain::job::{BatchJob, JobStatus};
use trawl_core::domain::task::{TaskPatch, TaskStatus};
use trawl_core::{BatchError, Result};
use trawl_store::{JobEvent, JobStore};
use uuid::Uuid;

use crate::bridge::ExtractionBridge;
use crate::config::RunnerConfig;
use crate::leases::{LeaseGuard, TaskLeases};
use crate::sweep::recover_orphan;
use crate::tabs::HiddenTabManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Job not started yet
    Idle,
    /// Filling concurrency slots
    Admitting,
    /// Paused or cancelled, waiting for in-flight attempts to settle
    Draining,
    /// Job reached a terminal status
    Settled,
}

pub struct BatchScheduler {
    store: Arc<JobStore>,
    tabs: Arc<HiddenTabManager>,
    bridge: Arc<ExtractionBridge>,
    leases: TaskLeases,
    config: RunnerConfig,
}

/// Everything one attempt needs, detached from the scheduler's borrow
#[derive(Clone)]
struct AttemptContext {
    job_id: Uuid,
    store: Arc<JobStore>,
    tabs: Arc<HiddenTabManager>,
    bridge: Arc<ExtractionBridge>,
    extraction: Arc<ExtractionConfig>,
    disable_javascript: bool,
}

/// Outcome of a finished attempt, waiting to be committed
struct Settlement {
    lease: LeaseGuard,
    attempt: u32,
    result: Result<Vec<Row>>,
}

/// A task that failed and is waiting out its backoff while still `running`
struct Backoff {
    lease: LeaseGuard,
    due: Instant,
}

/// Mutable state of one `run_job` call
struct RunState {
    phase: SchedulerPhase,
    in_flight: FuturesUnordered<BoxFuture<'static, Settlement>>,
    backoffs: HashMap<String, Backoff>,
    unsettled: Vec<Settlement>,
    last_admission: Option<Instant>,
    next_admission: Option<Instant>,
    cancel: watch::Sender<bool>,
    storage_failed: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            in_flight: FuturesUnordered::new(),
            backoffs: HashMap::new(),
            unsettled: Vec::new(),
            last_admission: None,
            next_admission: None,
            cancel: watch::channel(false).0,
            storage_failed: false,
        }
    }

    fn is_quiet(&self) -> bool {
        self.in_flight.is_empty() && self.backoffs.is_empty() && self.unsettled.is_empty()
    }

    fn enter(&mut self, job_id: Uuid, phase: SchedulerPhase) {
        if self.phase != phase {
            debug!("Scheduler for job {}: {:?} -> {:?}", job_id, self.phase, phase);
            self.phase = phase;
        }
    }
}

impl BatchScheduler {
    pub fn new(
        store: Arc<JobStore>,
        tabs: Arc<HiddenTabManager>,
        bridge: Arc<ExtractionBridge>,
        leases: TaskLeases,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            tabs,
            bridge,
            leases,
            config,
        }
    }

    /// Drives the job until it reaches a terminal status or is deleted
    ///
    /// Task-level failures never end the loop. Storage failures stop
    /// admissions until the next successful read.
    pub async fn run_job(&self, job_id: Uuid) -> Result<SchedulerPhase> {
        // Subscribe before the first read so no commit goes unnoticed
        let mut events = self.store.subscribe(job_id);
        let mut state = RunState::new();

        if let Err(e) = self.reclaim_orphans(job_id).await {
            if !e.is_storage() {
                return Err(e);
            }
            self.storage_failure(job_id, &mut state, &e);
        }
        info!("Scheduler started for job {}", job_id);

        loop {
            let job = match self.store.get_job(job_id).await {
                Ok(Some(job)) => {
                    if state.storage_failed {
                        info!("Storage for job {} is reachable again", job_id);
                        state.storage_failed = false;
                    }
                    job
                }
                Ok(None) => {
                    info!("Job {} was deleted, stopping its scheduler", job_id);
                    self.abandon(&mut state).await;
                    return Ok(SchedulerPhase::Settled);
                }
                Err(e) if e.is_storage() => {
                    self.storage_failure(job_id, &mut state, &e);
                    self.wait(&mut state, &mut events).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self.step(&job, &mut state).await {
                if e.is_storage() {
                    self.storage_failure(job_id, &mut state, &e);
                } else if !e.is_conflict() {
                    error!("Scheduler step for job {} failed: {}", job_id, e);
                }
            }

            if state.phase == SchedulerPhase::Settled {
                info!("Scheduler for job {} settled", job_id);
                return Ok(SchedulerPhase::Settled);
            }

            self.wait(&mut state, &mut events).await;
        }
    }

    /// One reconciliation pass against a fresh read of the job
    async fn step(&self, job: &BatchJob, state: &mut RunState) -> Result<()> {
        if job.status == JobStatus::Cancelled {
            state.cancel.send_replace(true);
        }

        self.commit_settlements(job, state).await?;
        self.release_backoffs(job, state).await?;

        match job.status {
            JobStatus::Pending => state.enter(job.id, SchedulerPhase::Idle),
            JobStatus::Running => {
                state.enter(job.id, SchedulerPhase::Admitting);
                if !state.storage_failed {
                    self.admit(job, state).await?;
                }

                if state.is_quiet() && job.statistics.all_terminal() {
                    self.store
                        .set_job_status(job.id, &[JobStatus::Running], JobStatus::Completed)
                        .await?;
                    info!(
                        "Job {} completed: {} completed, {} failed, {} row(s)",
                        job.id, job.statistics.completed, job.statistics.failed, job.statistics.total_rows
                    );
                }
            }
            JobStatus::Paused => state.enter(job.id, SchedulerPhase::Draining),
            JobStatus::Cancelled => {
                state.enter(job.id, SchedulerPhase::Draining);
                self.cancel_pending(job).await?;
                if state.is_quiet() {
                    state.enter(job.id, SchedulerPhase::Settled);
                }
            }
            JobStatus::Completed => {
                if state.is_quiet() {
                    state.enter(job.id, SchedulerPhase::Settled);
                }
            }
        }

        Ok(())
    }

    /// Promotes pending tasks to running in URL-list order
    async fn admit(&self, job: &BatchJob, state: &mut RunState) -> Result<()> {
        let max_concurrency = job.settings.max_concurrency as usize;
        let pacing = Duration::from_millis(job.settings.delay_between_requests_ms);
        state.next_admission = None;

        for url in job.urls_with_status(TaskStatus::Pending) {
            if state.in_flight.len() >= max_concurrency {
                break;
            }

            if let Some(last) = state.last_admission {
                let ready_at = last + pacing;
                if Instant::now() < ready_at {
                    state.next_admission = Some(ready_at);
                    break;
                }
            }

            let Some(lease) = self.leases.acquire(job.id, &url) else {
                continue;
            };

            let admitted = self
                .store
                .transition_task(job.id, &url, &[TaskStatus::Pending], TaskStatus::Running, TaskPatch::default())
                .await;

            let job = match admitted {
                Ok(job) => job,
                Err(e) if e.is_conflict() => {
                    debug!("Admission of {} lost a race, skipping", url);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let attempt = job.task(&url).map(|task| task.attempt).unwrap_or(0);
            debug!("Admitted {} (attempt {}) into job {}", url, attempt + 1, job.id);

            state.last_admission = Some(Instant::now());
            state.in_flight.push(self.spawn_attempt(&job, lease, attempt, state.cancel.subscribe()));
        }

        Ok(())
    }

    fn spawn_attempt(
        &self,
        job: &BatchJob,
        lease: LeaseGuard,
        attempt: u32,
        cancel: watch::Receiver<bool>,
    ) -> BoxFuture<'static, Settlement> {
        let ctx = AttemptContext {
            job_id: job.id,
            store: Arc::clone(&self.store),
            tabs: Arc::clone(&self.tabs),
            bridge: Arc::clone(&self.bridge),
            extraction: Arc::new(job.config.clone()),
            disable_javascript: job.settings.disable_js_rendering,
        };

        async move {
            let result = run_attempt(&ctx, lease.url(), cancel).await;
            Settlement {
                lease,
                attempt,
                result,
            }
        }
        .boxed()
    }

    /// Commits finished attempts; anything the store rejects stays queued
    async fn commit_settlements(&self, job: &BatchJob, state: &mut RunState) -> Result<()> {
        while let Some(settlement) = state.unsettled.pop() {
            match self.settle(job, settlement).await {
                Ok(None) => {}
                Ok(Some(backoff)) => {
                    state.backoffs.insert(backoff.lease.url().to_string(), backoff);
                }
                Err((e, settlement)) => {
                    state.unsettled.push(settlement);
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Applies the retry policy to one finished attempt
    ///
    /// Returns the backoff entry when the task is to be retried.
    async fn settle(
        &self,
        job: &BatchJob,
        settlement: Settlement,
    ) -> std::result::Result<Option<Backoff>, (BatchError, Settlement)> {
        let url = settlement.lease.url().to_string();
        let cancelled = job.status == JobStatus::Cancelled;

        let (to, patch) = match &settlement.result {
            _ if cancelled => (TaskStatus::Cancelled, TaskPatch::default()),
            Ok(rows) => {
                debug!("Task {} extracted {} row(s)", url, rows.len());
                (TaskStatus::Completed, TaskPatch::rows(rows.clone()))
            }
            Err(BatchError::Cancelled) => (TaskStatus::Cancelled, TaskPatch::default()),
            Err(e) if !e.is_retryable() => {
                warn!("Task {} failed permanently: {}", url, e);
                (TaskStatus::Failed, TaskPatch::failure(e.to_string(), settlement.attempt))
            }
            Err(e) => {
                let attempt = settlement.attempt + 1;
                if attempt > job.settings.max_retries {
                    warn!("Task {} failed after {} attempt(s): {}", url, attempt, e);
                    (TaskStatus::Failed, TaskPatch::failure(e.to_string(), attempt))
                } else {
                    let delay = self.config.backoff_delay(attempt);
                    info!(
                        "Task {} failed (attempt {}/{}), retrying in {:?}: {}",
                        url,
                        attempt,
                        job.settings.max_retries + 1,
                        delay,
                        e
                    );
                    (TaskStatus::Running, TaskPatch::attempt(attempt))
                }
            }
        };

        let committed = self
            .store
            .transition_task(job.id, &url, &[TaskStatus::Running], to, patch)
            .await;

        match committed {
            Ok(updated) if to == TaskStatus::Running => {
                let attempt = updated.task(&url).map(|task| task.attempt).unwrap_or(0);
                Ok(Some(Backoff {
                    due: Instant::now() + self.config.backoff_delay(attempt),
                    lease: settlement.lease,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_conflict() => {
                debug!("Task {} was settled elsewhere: {}", url, e);
                Ok(None)
            }
            Err(e) => Err((e, settlement)),
        }
    }

    /// Re-queues tasks whose backoff expired, or cancels them with their job
    async fn release_backoffs(&self, job: &BatchJob, state: &mut RunState) -> Result<()> {
        let now = Instant::now();
        let cancelled = job.status == JobStatus::Cancelled;
        let due: Vec<String> = state
            .backoffs
            .iter()
            .filter(|(_, backoff)| cancelled || backoff.due <= now)
            .map(|(url, _)| url.clone())
            .collect();

        for url in due {
            let to = if cancelled {
                TaskStatus::Cancelled
            } else {
                TaskStatus::Pending
            };

            match self
                .store
                .transition_task(job.id, &url, &[TaskStatus::Running], to, TaskPatch::default())
                .await
            {
                Ok(_) => {
                    debug!("Task {} of job {} -> {:?} after backoff", url, job.id, to);
                    state.backoffs.remove(&url);
                }
                Err(e) if e.is_conflict() => {
                    state.backoffs.remove(&url);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Catches pending tasks of a cancelled job that the store left behind
    async fn cancel_pending(&self, job: &BatchJob) -> Result<()> {
        for url in job.urls_with_status(TaskStatus::Pending) {
            match self
                .store
                .transition_task(job.id, &url, &[TaskStatus::Pending], TaskStatus::Cancelled, TaskPatch::default())
                .await
            {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Settles `running` tasks this process does not own
    async fn reclaim_orphans(&self, job_id: Uuid) -> Result<()> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(());
        };

        for task in job.tasks_in_order() {
            if task.status != TaskStatus::Running || self.leases.is_leased(job.id, &task.url) {
                continue;
            }

            if let Some(tab_id) = task.tab_id {
                self.tabs.close_hidden_tab(tab_id).await;
            }

            match recover_orphan(&self.store, &self.leases, job_id, &task.url, task.tab_id).await {
                Ok(status) => info!("Reclaimed task {} of job {} -> {:?}", task.url, job_id, status),
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Job vanished: abort attempts and close their tabs without settling
    async fn abandon(&self, state: &mut RunState) {
        state.cancel.send_replace(true);
        while state.in_flight.next().await.is_some() {}
        state.backoffs.clear();
        state.unsettled.clear();
    }

    fn storage_failure(&self, job_id: Uuid, state: &mut RunState, e: &BatchError) {
        if !state.storage_failed {
            error!("Storage failure on job {}, admissions paused: {}", job_id, e);
            self.store.notify_failure(job_id, e.to_string());
        }
        state.storage_failed = true;
    }

    /// Sleeps until an attempt finishes, the job changes, or a timer is due
    async fn wait(&self, state: &mut RunState, events: &mut broadcast::Receiver<JobEvent>) {
        let mut deadline = Instant::now() + self.config.poll_interval;
        if let Some(at) = state.next_admission {
            deadline = deadline.min(at);
        }
        if let Some(at) = state.backoffs.values().map(|b| b.due).min() {
            deadline = deadline.min(at);
        }
        if !state.unsettled.is_empty() && !state.storage_failed {
            deadline = Instant::now();
        }

        tokio::select! {
            Some(settlement) = state.in_flight.next(), if !state.in_flight.is_empty() => {
                state.unsettled.push(settlement);
            }
            event = events.recv() => match event {
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Scheduler skipped {} job event(s), re-reading", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    // Wait out the timer so a closed channel does not spin
                    tokio::time::sleep_until(deadline).await;
                }
            },
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }
}

/// Runs one attempt: open the tab, wait for load, extract, always close the tab
async fn run_attempt(
    ctx: &AttemptContext,
    url: &str,
    mut cancel: watch::Receiver<bool>,
) -> Result<Vec<Row>> {
    if *cancel.borrow() {
        return Err(BatchError::Cancelled);
    }

    let pending = ctx.tabs.open_tab(url, ctx.disable_javascript).await?;
    let tab_id = pending.tab_id;

    if let Err(e) = ctx
        .store
        .transition_task(ctx.job_id, url, &[TaskStatus::Running], TaskStatus::Running, TaskPatch::tab(tab_id))
        .await
    {
        warn!("Could not record {} for task {}: {}", tab_id, url, e);
    }

    let result = tokio::select! {
        _ = cancelled(&mut cancel) => Err(BatchError::Cancelled),
        result = async {
            ctx.tabs.await_load(pending).await?;
            ctx.bridge.extract(tab_id, &ctx.extraction).await
        } => result,
    };

    ctx.tabs.close_hidden_tab(tab_id).await;
    result
}

/// Resolves once the cancel flag is raised
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}
