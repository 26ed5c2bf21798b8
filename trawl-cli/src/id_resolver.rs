//! ID resolver module
//!
//! Resolves batch id prefixes to full ids against the job store, so users
//! can type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use trawl_store::JobStore;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a batch ID or prefix to a full UUID
///
/// # Errors
/// Returns an error if:
/// - No batch matches the prefix
/// - Multiple batches match the prefix (ambiguous)
/// - The store cannot be read
pub async fn resolve_batch_id(store: &JobStore, id: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(id);
    if let IdOrPrefix::Full(uuid) = id_or_prefix {
        return Ok(uuid);
    }

    let jobs = store
        .list_jobs()
        .await
        .context("Failed to list batches for ID resolution")?;

    let matches: Vec<Uuid> = jobs
        .iter()
        .map(|job| job.id)
        .filter(|job_id| id_or_prefix.matches(*job_id))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No batch found with ID starting with '{}'", id_or_prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple batches: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trawl_core::domain::extraction::{ColumnDefinition, ExtractionConfig};
    use trawl_core::dto::batch::CreateBatch;

    fn request() -> CreateBatch {
        CreateBatch {
            urls: vec!["https://example.com".to_string()],
            config: ExtractionConfig {
                container_selector: "body".to_string(),
                columns: vec![ColumnDefinition {
                    name: "text".to_string(),
                    selector: String::new(),
                    attribute: None,
                }],
            },
            settings: Default::default(),
            name: String::new(),
            origin_tab: None,
        }
    }

    #[tokio::test]
    async fn test_resolves_unique_prefix() {
        let store = JobStore::in_memory();
        let job = store.create_job(request()).await.unwrap();
        let prefix = &job.id.to_string()[..8];

        assert_eq!(resolve_batch_id(&store, prefix).await.unwrap(), job.id);
        assert!(resolve_batch_id(&store, "zzzz").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_prefix_is_ambiguous_with_two_batches() {
        let store = JobStore::in_memory();
        store.create_job(request()).await.unwrap();
        store.create_job(request()).await.unwrap();

        let err = resolve_batch_id(&store, "").await.unwrap_err();
        assert!(err.to_string().contains("Ambiguous"));
    }
}
