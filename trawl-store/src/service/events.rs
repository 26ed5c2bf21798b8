//! Change notifications published by the job store

use std::sync::Arc;

use trawl_core::domain::job::{BatchJob, JobStatus};
use trawl_core::domain::task::TaskStatus;
use uuid::Uuid;

/// What a committed mutation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobChange {
    Created,
    Task {
        url: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    Status {
        from: JobStatus,
        to: JobStatus,
    },
    /// Job cancelled together with its pending tasks
    Cancelled {
        tasks_cancelled: usize,
    },
    Renamed,
}

/// Notification delivered to job subscribers, in commit order
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// A mutation was committed; `job` is the state right after it
    Updated { change: JobChange, job: Arc<BatchJob> },
    /// A batch-level failure that did not commit anything
    Failure { job_id: Uuid, message: String },
    Deleted { job_id: Uuid },
}

impl JobEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::Updated { job, .. } => job.id,
            JobEvent::Failure { job_id, .. } | JobEvent::Deleted { job_id } => *job_id,
        }
    }

    /// Snapshot carried by the event, if any
    pub fn job(&self) -> Option<&BatchJob> {
        match self {
            JobEvent::Updated { job, .. } => Some(job),
            _ => None,
        }
    }
}
