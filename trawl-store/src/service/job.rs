//! Job State Store
//!
//! Durable record of every batch job. All changes go through atomic
//! compare-and-swap transitions that update the task map, the derived
//! statistics and `updated_at` in one committed write, then notify
//! subscribers in commit order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use trawl_core::domain::job::{BatchJob, JobStatus, normalize_name};
use trawl_core::domain::statistics::BatchStatistics;
use trawl_core::domain::task::{TaskPatch, TaskStatus, UrlTask};
use trawl_core::dto::batch::CreateBatch;
use trawl_core::{BatchError, Result};
use uuid::Uuid;

use super::events::{JobChange, JobEvent};
use crate::error::StoreError;
use crate::locks::KeyedLocks;
use crate::repository::{MemoryRecordStore, RecordStore, VersionedRecord};

/// Capacity of each job's change channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Read-modify-write rounds before a version race is reported as a conflict
const MAX_CAS_ROUNDS: usize = 8;

pub struct JobStore {
    records: Arc<dyn RecordStore>,
    locks: KeyedLocks,
    channels: Mutex<HashMap<Uuid, broadcast::Sender<JobEvent>>>,
}

impl JobStore {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            locks: KeyedLocks::new(),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Store backed by a process-local map
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRecordStore::new()))
    }

    /// Validates the request and persists a new `pending` job
    pub async fn create_job(&self, req: CreateBatch) -> Result<BatchJob> {
        let job = BatchJob::new(req)?;
        let key = job.id.to_string();
        let _guard = self.locks.lock(&key).await;

        let value = serde_json::to_string(&job).map_err(StoreError::from)?;
        if self
            .records
            .compare_and_set(&key, None, &value)
            .await?
            .is_none()
        {
            return Err(BatchError::Conflict(format!("job {} already exists", job.id)));
        }

        info!(
            "Batch job created: {} ('{}', {} URL(s))",
            job.id,
            job.name,
            job.urls.len()
        );
        self.publish(JobEvent::Updated {
            change: JobChange::Created,
            job: Arc::new(job.clone()),
        });

        Ok(job)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<BatchJob>> {
        let record = self.records.get(&job_id.to_string()).await?;
        record.map(|r| decode(job_id, &r)).transpose()
    }

    /// Like `get_job`, but a missing job is an error
    pub async fn require_job(&self, job_id: Uuid) -> Result<BatchJob> {
        self.get_job(job_id).await?.ok_or(BatchError::NotFound(job_id))
    }

    /// Every stored job, oldest first
    pub async fn list_jobs(&self) -> Result<Vec<BatchJob>> {
        let mut jobs = Vec::new();
        for key in self.records.keys().await? {
            let Ok(job_id) = Uuid::parse_str(&key) else {
                warn!("Skipping record with non-job key '{}'", key);
                continue;
            };
            if let Some(job) = self.get_job(job_id).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    /// Compare-and-swap on one task's status
    ///
    /// Fails with `Conflict` unless the task's current status is in `from`.
    /// Terminal tasks never move, and admission into `Running` from
    /// `Pending` additionally requires the job itself to be running.
    pub async fn transition_task(
        &self,
        job_id: Uuid,
        url: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        patch: TaskPatch,
    ) -> Result<BatchJob> {
        self.transition_task_with(job_id, url, from, |_, _| Ok((to, patch.clone())))
            .await
    }

    /// Like `transition_task`, with the target decided against the fresh record
    ///
    /// `decide` runs under the job's lock on every read-modify-write round and
    /// may reject the transition with an error.
    pub async fn transition_task_with<D>(
        &self,
        job_id: Uuid,
        url: &str,
        from: &[TaskStatus],
        mut decide: D,
    ) -> Result<BatchJob>
    where
        D: FnMut(&BatchJob, &UrlTask) -> Result<(TaskStatus, TaskPatch)>,
    {
        self.mutate(job_id, |job| {
            let task = job.task(url).ok_or_else(|| {
                BatchError::Validation(format!("{} is not part of job {}", url, job_id))
            })?;
            let current = task.status;

            if !from.contains(&current) || current.is_terminal() {
                return Err(BatchError::conflict(format!("task {}", url), from, current));
            }
            let (to, patch) = decide(job, task)?;
            if current == TaskStatus::Pending
                && to == TaskStatus::Running
                && job.status != JobStatus::Running
            {
                return Err(BatchError::conflict(
                    format!("admission of {} into job", url),
                    JobStatus::Running,
                    job.status,
                ));
            }

            let task = job.tasks.get_mut(url).ok_or_else(|| {
                BatchError::Validation(format!("{} is not part of job {}", url, job_id))
            })?;
            task.apply(to, patch);
            let rows_added = if to == TaskStatus::Completed {
                task.row_count()
            } else {
                0
            };
            job.statistics.record_transition(current, to, rows_added);

            Ok(JobChange::Task {
                url: url.to_string(),
                from: current,
                to,
            })
        })
        .await
    }

    /// Compare-and-swap on the job status
    pub async fn set_job_status(
        &self,
        job_id: Uuid,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<BatchJob> {
        let job = self
            .mutate(job_id, |job| {
                let current = job.status;
                if !from.contains(&current) {
                    return Err(BatchError::conflict(format!("job {}", job_id), from, current));
                }
                if !current.can_transition_to(to) {
                    return Err(BatchError::Validation(format!(
                        "job cannot move from {:?} to {:?}",
                        current, to
                    )));
                }
                job.status = to;
                Ok(JobChange::Status { from: current, to })
            })
            .await?;

        info!("Batch job {} is now {:?}", job_id, to);
        Ok(job)
    }

    /// Cancels the job and all of its pending tasks in one atomic unit
    ///
    /// Running tasks are left for their scheduler to abort and settle.
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<BatchJob> {
        let job = self
            .mutate(job_id, |job| {
                let current = job.status;
                if !current.can_transition_to(JobStatus::Cancelled) {
                    return Err(BatchError::conflict(
                        format!("job {}", job_id),
                        [JobStatus::Pending, JobStatus::Running, JobStatus::Paused],
                        current,
                    ));
                }
                job.status = JobStatus::Cancelled;

                let mut tasks_cancelled = 0;
                for task in job.tasks.values_mut() {
                    if task.status == TaskStatus::Pending {
                        task.apply(TaskStatus::Cancelled, TaskPatch::default());
                        job.statistics
                            .record_transition(TaskStatus::Pending, TaskStatus::Cancelled, 0);
                        tasks_cancelled += 1;
                    }
                }

                Ok(JobChange::Cancelled { tasks_cancelled })
            })
            .await?;

        info!("Batch job {} cancelled", job_id);
        Ok(job)
    }

    pub async fn update_name(&self, job_id: Uuid, name: &str) -> Result<BatchJob> {
        let name = normalize_name(name, Utc::now())?;
        self.mutate(job_id, |job| {
            job.name = name.clone();
            Ok(JobChange::Renamed)
        })
        .await
    }

    /// Removes the job record and closes its change channel
    pub async fn delete_job(&self, job_id: Uuid) -> Result<bool> {
        let _guard = self.locks.lock(&job_id.to_string()).await;
        let existed = self.records.delete(&job_id.to_string()).await?;

        if existed {
            info!("Batch job {} deleted", job_id);
            self.publish(JobEvent::Deleted { job_id });
        }
        self.lock_channels().remove(&job_id);

        Ok(existed)
    }

    /// Receives every event committed for `job_id` from now on
    ///
    /// A lagging receiver loses events and must re-read the job.
    pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<JobEvent> {
        self.lock_channels()
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publishes a batch-level failure that did not commit anything
    pub fn notify_failure(&self, job_id: Uuid, message: impl Into<String>) {
        self.publish(JobEvent::Failure {
            job_id,
            message: message.into(),
        });
    }

    /// Read-modify-CAS loop shared by every job mutation
    ///
    /// `apply` may run more than once when another writer of the same
    /// record (another process) wins a round.
    async fn mutate<F>(&self, job_id: Uuid, mut apply: F) -> Result<BatchJob>
    where
        F: FnMut(&mut BatchJob) -> Result<JobChange>,
    {
        let key = job_id.to_string();
        let _guard = self.locks.lock(&key).await;

        for round in 1..=MAX_CAS_ROUNDS {
            let record = self
                .records
                .get(&key)
                .await?
                .ok_or(BatchError::NotFound(job_id))?;
            let mut job = decode(job_id, &record)?;

            let change = apply(&mut job)?;
            job.updated_at = Utc::now();
            debug_assert_eq!(job.statistics, BatchStatistics::from_tasks(job.tasks.values()));

            let value = serde_json::to_string(&job).map_err(StoreError::from)?;
            match self
                .records
                .compare_and_set(&key, Some(record.version), &value)
                .await?
            {
                Some(_) => {
                    debug!("Committed {:?} on job {}", change, job_id);
                    let job = Arc::new(job);
                    self.publish(JobEvent::Updated {
                        change,
                        job: Arc::clone(&job),
                    });
                    return Ok(Arc::unwrap_or_clone(job));
                }
                None => {
                    debug!(
                        "Version race on job {} (round {}/{}), re-reading",
                        job_id, round, MAX_CAS_ROUNDS
                    );
                }
            }
        }

        Err(BatchError::Conflict(format!(
            "job {} kept changing underneath {} write attempts",
            job_id, MAX_CAS_ROUNDS
        )))
    }

    fn publish(&self, event: JobEvent) {
        if let Some(sender) = self.lock_channels().get(&event.job_id()) {
            // No receivers is fine
            let _ = sender.send(event);
        }
    }

    fn lock_channels(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, broadcast::Sender<JobEvent>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Decodes a stored record, rebuilding statistics that drifted from the task map
fn decode(job_id: Uuid, record: &VersionedRecord) -> Result<BatchJob> {
    let mut job: BatchJob = serde_json::from_str(&record.value).map_err(StoreError::from)?;

    let derived = BatchStatistics::from_tasks(job.tasks.values());
    if job.statistics != derived {
        warn!(
            "Statistics of job {} disagree with its tasks, rebuilding",
            job_id
        );
        job.statistics = derived;
    }

    Ok(job)
}
