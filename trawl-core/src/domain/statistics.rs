//! Aggregate statistics derived from per-URL task statuses

use serde::{Deserialize, Serialize};

use super::task::{TaskStatus, UrlTask};

/// Per-status task counts for one job
///
/// Always derived from the task map; the job store updates it incrementally
/// on every committed transition and rebuilds it when a record is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatistics {
    pub total: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_rows: u64,
}

impl BatchStatistics {
    /// Full recomputation from the task map
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a UrlTask>) -> Self {
        let mut stats = Self::default();
        for task in tasks {
            stats.total += 1;
            *stats.slot(task.status) += 1;
            stats.total_rows += task.row_count();
        }
        stats
    }

    /// Incremental update for one task moving from `from` to `to`
    pub fn record_transition(&mut self, from: TaskStatus, to: TaskStatus, rows_added: u64) {
        if from != to {
            let slot = self.slot(from);
            *slot = slot.saturating_sub(1);
            *self.slot(to) += 1;
        }
        self.total_rows += rows_added;
    }

    pub fn count(&self, status: TaskStatus) -> u64 {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    /// Sum of the per-status counts equals the number of URLs
    pub fn is_consistent(&self) -> bool {
        self.pending + self.running + self.completed + self.failed + self.cancelled == self.total
    }

    /// Every task reached a terminal status
    pub fn all_terminal(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    fn slot(&mut self, status: TaskStatus) -> &mut u64 {
        match status {
            TaskStatus::Pending => &mut self.pending,
            TaskStatus::Running => &mut self.running,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskPatch;

    #[test]
    fn test_from_tasks_counts_each_status() {
        let mut tasks: Vec<UrlTask> = (0..5).map(|i| UrlTask::new(format!("https://{}.test", i))).collect();
        tasks[0].apply(TaskStatus::Running, TaskPatch::default());
        tasks[1].apply(TaskStatus::Failed, TaskPatch::failure("x", 1));
        tasks[2].apply(TaskStatus::Cancelled, TaskPatch::default());

        let stats = BatchStatistics::from_tasks(&tasks);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.cancelled, 1);
        assert!(stats.is_consistent());
        assert!(!stats.all_terminal());

        let counted: u64 = TaskStatus::ALL.iter().map(|status| stats.count(*status)).sum();
        assert_eq!(counted, stats.total);
        assert_eq!(stats.count(TaskStatus::Pending), 2);
        assert_eq!(stats.count(TaskStatus::Completed), 0);
    }

    #[test]
    fn test_incremental_matches_recomputation() {
        let mut tasks: Vec<UrlTask> = (0..4).map(|i| UrlTask::new(format!("https://{}.test", i))).collect();
        let mut stats = BatchStatistics::from_tasks(&tasks);

        let steps = [
            (0, TaskStatus::Running),
            (1, TaskStatus::Running),
            (0, TaskStatus::Completed),
            (1, TaskStatus::Pending),
            (1, TaskStatus::Running),
            (1, TaskStatus::Failed),
            (2, TaskStatus::Cancelled),
            (3, TaskStatus::Running),
            (3, TaskStatus::Running),
        ];

        for (index, to) in steps {
            let from = tasks[index].status;
            let patch = if to == TaskStatus::Completed {
                let mut row = crate::domain::extraction::Row::new();
                row.insert("k".to_string(), "v".to_string());
                TaskPatch::rows(vec![row.clone(), row])
            } else {
                TaskPatch::default()
            };
            tasks[index].apply(to, patch);
            stats.record_transition(from, to, if to == TaskStatus::Completed { tasks[index].row_count() } else { 0 });

            assert_eq!(stats, BatchStatistics::from_tasks(&tasks));
            assert!(stats.is_consistent());
        }

        assert_eq!(stats.total_rows, 2);
    }
}
