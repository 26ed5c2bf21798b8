//! Control surface
//!
//! Entry point for callers that create and steer batch jobs. Owns the
//! per-job schedulers of this process and the shared task leases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use trawl_core::domain::job::{BatchJob, JobStatus};
use trawl_core::dto::batch::CreateBatch;
use trawl_core::{BatchError, Result};
use trawl_store::{JobEvent, JobStore};
use uuid::Uuid;

use crate::bridge::ExtractionBridge;
use crate::config::RunnerConfig;
use crate::leases::TaskLeases;
use crate::scheduler::BatchScheduler;
use crate::sweep::{CleanupSweep, SweepReport};
use crate::tabs::HiddenTabManager;

pub struct BatchController {
    store: Arc<JobStore>,
    scheduler: Arc<BatchScheduler>,
    sweep: Arc<CleanupSweep>,
    config: RunnerConfig,
    active: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

/// Live subscription to one job's events; detaches when dropped
pub struct Subscription {
    forwarder: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl BatchController {
    pub fn new(
        store: Arc<JobStore>,
        tabs: Arc<HiddenTabManager>,
        bridge: Arc<ExtractionBridge>,
        config: RunnerConfig,
    ) -> Self {
        let leases = TaskLeases::new();
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&store),
            Arc::clone(&tabs),
            bridge,
            leases.clone(),
            config.clone(),
        ));
        let sweep = Arc::new(CleanupSweep::new(Arc::clone(&store), tabs, leases, config.clone()));

        Self {
            store,
            scheduler,
            sweep,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Creates a job and starts scheduling it right away
    pub async fn create_and_start_batch(&self, req: CreateBatch) -> Result<BatchJob> {
        let job = self.store.create_job(req).await?;
        let job = self
            .store
            .set_job_status(job.id, &[JobStatus::Pending], JobStatus::Running)
            .await?;
        self.ensure_scheduler(job.id);
        Ok(job)
    }

    /// Stops new admissions; in-flight tasks settle normally
    pub async fn pause_batch(&self, job_id: Uuid) -> Result<BatchJob> {
        self.store
            .set_job_status(job_id, &[JobStatus::Running], JobStatus::Paused)
            .await
            .inspect_err(|e| warn!("Failed to pause batch {}: {}", job_id, e))
    }

    pub async fn resume_batch(&self, job_id: Uuid) -> Result<BatchJob> {
        let job = self
            .store
            .set_job_status(job_id, &[JobStatus::Paused], JobStatus::Running)
            .await
            .inspect_err(|e| warn!("Failed to resume batch {}: {}", job_id, e))?;
        self.ensure_scheduler(job_id);
        Ok(job)
    }

    /// Cancels the job; running tasks are aborted by their scheduler
    pub async fn cancel_batch(&self, job_id: Uuid) -> Result<BatchJob> {
        let job = self
            .store
            .cancel_job(job_id)
            .await
            .inspect_err(|e| warn!("Failed to cancel batch {}: {}", job_id, e))?;

        if job.statistics.running > 0 {
            // Someone has to settle the running tasks
            self.ensure_scheduler(job_id);
        }
        Ok(job)
    }

    /// Deletes the job, cancelling it first if it is still active
    pub async fn delete_batch(&self, job_id: Uuid) -> Result<bool> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(false);
        };

        if !job.status.is_terminal() {
            match self.cancel_batch(job_id).await {
                Ok(_) => {}
                Err(e) if e.is_conflict() => {}
                Err(e) => return Err(e),
            }
        }

        let handle = self.lock_active().remove(&job_id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Scheduler for job {} ended abnormally: {}", job_id, e);
            }
        }

        self.store.delete_job(job_id).await
    }

    pub async fn update_batch_name(&self, job_id: Uuid, name: &str) -> Result<BatchJob> {
        self.store.update_name(job_id, name).await
    }

    /// Calls `callback` for every event committed on the job, in commit order
    pub fn subscribe_batch<F>(&self, job_id: Uuid, callback: F) -> Subscription
    where
        F: Fn(JobEvent) + Send + 'static,
    {
        let mut events = self.store.subscribe(job_id);

        let forwarder = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let deleted = matches!(event, JobEvent::Deleted { .. });
                        callback(event);
                        if deleted {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            "Subscriber of job {} missed {} event(s); the next snapshot is authoritative",
                            job_id, skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription { forwarder }
    }

    /// Waits until the job is terminal and its scheduler has stopped
    pub async fn wait_for_batch(&self, job_id: Uuid) -> Result<BatchJob> {
        let mut events = self.store.subscribe(job_id);

        loop {
            let job = self.store.require_job(job_id).await?;
            if job.status.is_terminal() && !self.is_scheduling(job_id) {
                return Ok(job);
            }

            tokio::select! {
                _ = events.recv() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Restart recovery: resumes scheduling of every running job
    pub async fn recover_jobs(&self) -> Result<usize> {
        let mut recovered = 0;

        for job in self.store.list_jobs().await? {
            let has_running_tasks = job.statistics.running > 0;
            let wants_scheduler = match job.status {
                JobStatus::Running => true,
                JobStatus::Paused | JobStatus::Cancelled => has_running_tasks,
                JobStatus::Pending | JobStatus::Completed => false,
            };

            if wants_scheduler && !self.is_scheduling(job.id) {
                info!("Recovering job {} ({:?})", job.id, job.status);
                self.ensure_scheduler(job.id);
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    /// Takes over driving one existing job in this process
    ///
    /// A paused job is resumed. A terminal job is returned as is.
    pub async fn drive_batch(&self, job_id: Uuid) -> Result<BatchJob> {
        let job = self.store.require_job(job_id).await?;

        match job.status {
            JobStatus::Pending => {
                let job = self
                    .store
                    .set_job_status(job_id, &[JobStatus::Pending], JobStatus::Running)
                    .await?;
                self.ensure_scheduler(job_id);
                Ok(job)
            }
            JobStatus::Paused => self.resume_batch(job_id).await,
            JobStatus::Running => {
                self.ensure_scheduler(job_id);
                Ok(job)
            }
            JobStatus::Cancelled if job.statistics.running > 0 => {
                self.ensure_scheduler(job_id);
                Ok(job)
            }
            JobStatus::Cancelled | JobStatus::Completed => Ok(job),
        }
    }

    pub async fn run_sweep(&self) -> Result<SweepReport> {
        self.sweep.run_once().await
    }

    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        Arc::clone(&self.sweep).spawn(self.config.sweep_interval)
    }

    /// Whether a scheduler of this process is still driving the job
    pub fn is_scheduling(&self, job_id: Uuid) -> bool {
        self.lock_active()
            .get(&job_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn ensure_scheduler(&self, job_id: Uuid) {
        let mut active = self.lock_active();
        active.retain(|_, handle| !handle.is_finished());

        if active.contains_key(&job_id) {
            debug!("Job {} already has a scheduler", job_id);
            return;
        }

        let scheduler = Arc::clone(&self.scheduler);
        let handle = tokio::spawn(async move {
            match scheduler.run_job(job_id).await {
                Ok(phase) => debug!("Scheduler for job {} finished in {:?}", job_id, phase),
                Err(BatchError::NotFound(_)) => debug!("Job {} disappeared", job_id),
                Err(e) => error!("Scheduler for job {} failed: {}", job_id, e),
            }
        });
        active.insert(job_id, handle);
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for BatchController {
    fn drop(&mut self) {
        for handle in self.lock_active().values() {
            handle.abort();
        }
    }
}
