//! Per-URL task types

use serde::{Deserialize, Serialize};

use super::extraction::Row;

/// Browser-assigned identifier of a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl std::fmt::Display for TabId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// Lifecycle status of one URL inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Terminal statuses admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Scraping state of a single URL, owned by its batch job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlTask {
    pub url: String,
    pub status: TaskStatus,
    /// Attempts made so far, counted when an attempt fails
    ///
    /// A successful attempt settles the task without bumping the counter, so
    /// a task completed on its first try keeps `attempt == 0`.
    pub attempt: u32,
    /// Last failure reason, only set while `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Extracted rows, only set while `Completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    /// Hidden tab currently serving this task, only set while `Running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
}

/// Field changes carried by a task transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub rows: Option<Vec<Row>>,
    pub error: Option<String>,
    /// Tab serving the task after the transition; ignored unless the target is `Running`
    pub tab_id: Option<TabId>,
    pub attempt: Option<u32>,
}

impl TaskPatch {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows: Some(rows),
            ..Default::default()
        }
    }

    pub fn failure(error: impl Into<String>, attempt: u32) -> Self {
        Self {
            error: Some(error.into()),
            attempt: Some(attempt),
            ..Default::default()
        }
    }

    pub fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            ..Default::default()
        }
    }

    pub fn attempt(attempt: u32) -> Self {
        Self {
            attempt: Some(attempt),
            ..Default::default()
        }
    }
}

impl UrlTask {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: TaskStatus::Pending,
            attempt: 0,
            error: None,
            rows: None,
            tab_id: None,
        }
    }

    /// Moves the task to `to`, keeping `error`, `rows` and `tab_id` consistent with the new status
    pub fn apply(&mut self, to: TaskStatus, patch: TaskPatch) {
        self.status = to;
        if let Some(attempt) = patch.attempt {
            self.attempt = attempt;
        }

        self.rows = match to {
            TaskStatus::Completed => Some(patch.rows.unwrap_or_default()),
            _ => None,
        };

        self.error = match to {
            TaskStatus::Failed => Some(patch.error.unwrap_or_else(|| "unknown failure".to_string())),
            _ => None,
        };

        self.tab_id = match to {
            TaskStatus::Running => patch.tab_id,
            _ => None,
        };
    }

    pub fn row_count(&self) -> u64 {
        self.rows.as_ref().map(|rows| rows.len() as u64).unwrap_or(0)
    }
}
