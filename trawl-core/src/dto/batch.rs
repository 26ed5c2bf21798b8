//! Batch DTOs

use serde::{Deserialize, Serialize};

use crate::domain::extraction::ExtractionConfig;
use crate::domain::settings::BatchSettings;
use crate::domain::task::TabId;

/// Request to create a new batch job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatch {
    pub urls: Vec<String>,
    pub config: ExtractionConfig,
    #[serde(default)]
    pub settings: BatchSettings,
    #[serde(default)]
    pub name: String,
    /// Set for single-URL jobs started from an open page
    #[serde(default)]
    pub origin_tab: Option<TabId>,
}
