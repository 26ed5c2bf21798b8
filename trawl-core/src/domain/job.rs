//! Batch job domain types

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extraction::{ExtractionConfig, Row};
use super::settings::BatchSettings;
use super::statistics::BatchStatistics;
use super::task::{TabId, TaskStatus, UrlTask};
use crate::dto::batch::CreateBatch;
use crate::error::{BatchError, Result};

/// Batch job record
///
/// This is the persisted layout: the job store serializes it as one JSON
/// document per job and rebuilds it verbatim on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: Uuid,
    pub name: String,
    pub config: ExtractionConfig,
    pub urls: Vec<String>,
    pub settings: BatchSettings,
    pub status: JobStatus,
    pub statistics: BatchStatistics,
    pub tasks: BTreeMap<String, UrlTask>,
    /// Tab that spawned a single-URL ephemeral job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_tab: Option<TabId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Batch job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Edges of the job lifecycle graph
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Pending, Cancelled)
                | (Running, Cancelled)
                | (Paused, Cancelled)
        )
    }
}

impl BatchJob {
    /// Builds a new pending job, validating and deduplicating its input
    pub fn new(req: CreateBatch) -> Result<Self> {
        req.settings.validate()?;
        req.config.validate()?;

        let urls = normalize_urls(&req.urls)?;
        let now = Utc::now();
        let name = normalize_name(&req.name, now)?;

        let tasks: BTreeMap<String, UrlTask> = urls
            .iter()
            .map(|url| (url.clone(), UrlTask::new(url.clone())))
            .collect();
        let statistics = BatchStatistics::from_tasks(tasks.values());

        Ok(Self {
            id: Uuid::new_v4(),
            name,
            config: req.config,
            urls,
            settings: req.settings,
            status: JobStatus::Pending,
            statistics,
            tasks,
            origin_tab: req.origin_tab,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn task(&self, url: &str) -> Option<&UrlTask> {
        self.tasks.get(url)
    }

    /// Tasks in URL-list order
    pub fn tasks_in_order(&self) -> impl Iterator<Item = &UrlTask> {
        self.urls.iter().filter_map(|url| self.tasks.get(url))
    }

    /// URLs currently in `status`, in URL-list order
    pub fn urls_with_status(&self, status: TaskStatus) -> Vec<String> {
        self.tasks_in_order()
            .filter(|task| task.status == status)
            .map(|task| task.url.clone())
            .collect()
    }

    /// Rows of every completed task, in URL-list order
    pub fn results(&self) -> Vec<(&str, &[Row])> {
        self.tasks_in_order()
            .filter_map(|task| task.rows.as_deref().map(|rows| (task.url.as_str(), rows)))
            .collect()
    }

    /// Rebuilds the derived statistics from the task map
    pub fn recompute_statistics(&mut self) {
        self.statistics = BatchStatistics::from_tasks(self.tasks.values());
    }
}

/// Trims, drops empty and unparseable entries, and removes duplicates
/// (case-sensitive, first occurrence wins)
pub fn normalize_urls(raw: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty() || url::Url::parse(candidate).is_err() {
            continue;
        }
        if seen.insert(candidate.to_string()) {
            urls.push(candidate.to_string());
        }
    }

    if urls.is_empty() {
        return Err(BatchError::Validation(
            "no valid URLs were provided".to_string(),
        ));
    }

    Ok(urls)
}

/// Trims the name and rejects control characters; blank names get a dated default
pub fn normalize_name(raw: &str, now: DateTime<Utc>) -> Result<String> {
    let name = raw.trim();

    if name.chars().any(char::is_control) {
        return Err(BatchError::Validation(
            "name cannot contain control characters".to_string(),
        ));
    }

    if name.is_empty() {
        return Ok(format!("Batch {}", now.format("%Y-%m-%d %H:%M")));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::extraction::ColumnDefinition;
    use crate::domain::task::TaskPatch;

    fn request(urls: &[&str]) -> CreateBatch {
        CreateBatch {
            urls: urls.iter().map(|u| u.to_string()).collect(),
            config: ExtractionConfig {
                container_selector: "li".to_string(),
                columns: vec![ColumnDefinition {
                    name: "title".to_string(),
                    selector: "h2".to_string(),
                    attribute: None,
                }],
            },
            settings: BatchSettings::default(),
            name: "Products".to_string(),
            origin_tab: None,
        }
    }

    #[test]
    fn test_new_job_dedups_and_trims_urls() {
        let job = BatchJob::new(request(&[
            " https://a.test/1 ",
            "https://a.test/1",
            "https://A.test/1",
            "not a url",
            "",
            "https://a.test/2",
        ]))
        .unwrap();

        assert_eq!(
            job.urls,
            vec!["https://a.test/1", "https://A.test/1", "https://a.test/2"]
        );
        assert_eq!(job.tasks.len(), 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.statistics.total, 3);
        assert_eq!(job.statistics.pending, 3);
    }

    #[test]
    fn test_new_job_requires_a_valid_url() {
        let err = BatchJob::new(request(&["", "   ", "nope"])).unwrap_err();
        assert!(matches!(err, BatchError::Validation(_)));
    }

    #[test]
    fn test_new_job_validates_settings() {
        let mut req = request(&["https://a.test"]);
        req.settings.max_concurrency = 0;
        assert!(matches!(BatchJob::new(req), Err(BatchError::Validation(_))));
    }

    #[test]
    fn test_name_rules() {
        let now = Utc::now();
        assert_eq!(normalize_name("  Shop  ", now).unwrap(), "Shop");
        assert!(normalize_name("bad\u{7}name", now).is_err());
        assert!(normalize_name("", now).unwrap().starts_with("Batch "));
    }

    #[test]
    fn test_job_status_graph() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Paused.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_persisted_layout_round_trip() {
        let mut job = BatchJob::new(request(&["https://a.test/1", "https://a.test/2"])).unwrap();
        let mut row = Row::new();
        row.insert("title".to_string(), "Widget".to_string());
        job.tasks
            .get_mut("https://a.test/1")
            .unwrap()
            .apply(TaskStatus::Completed, TaskPatch::rows(vec![row]));
        job.tasks
            .get_mut("https://a.test/2")
            .unwrap()
            .apply(TaskStatus::Running, TaskPatch::tab(TabId(42)));
        job.origin_tab = Some(TabId(3));
        job.recompute_statistics();

        let encoded = serde_json::to_value(&job).unwrap();
        assert!(encoded.get("createdAt").is_some());
        assert!(encoded["statistics"].get("totalRows").is_some());
        assert_eq!(encoded["tasks"]["https://a.test/2"]["tabId"], 42);

        let decoded: BatchJob = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_results_follow_url_order() {
        let mut job = BatchJob::new(request(&["https://b.test", "https://a.test"])).unwrap();
        for url in ["https://a.test", "https://b.test"] {
            job.tasks
                .get_mut(url)
                .unwrap()
                .apply(TaskStatus::Completed, TaskPatch::rows(vec![Row::new()]));
        }

        let urls: Vec<&str> = job.results().iter().map(|(url, _)| *url).collect();
        assert_eq!(urls, vec!["https://b.test", "https://a.test"]);
    }
}
