//! Extraction configuration
//!
//! The selector configuration handed to the extraction capability. The
//! runner treats it as opaque; only creation-time validation lives here.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

/// One extracted row, keyed by column name
pub type Row = BTreeMap<String, String>;

/// Selector plus column definitions used for every URL of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionConfig {
    /// CSS selector matching one element per row
    pub container_selector: String,
    /// Columns extracted relative to each matched container
    pub columns: Vec<ColumnDefinition>,
}

/// A single output column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    /// Selector relative to the row container; empty selects the container itself
    #[serde(default)]
    pub selector: String,
    /// Attribute to read instead of the text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.container_selector.trim().is_empty() {
            return Err(BatchError::Validation(
                "container selector cannot be empty".to_string(),
            ));
        }

        if self.columns.is_empty() {
            return Err(BatchError::Validation(
                "at least one column is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            let name = column.name.trim();
            if name.is_empty() {
                return Err(BatchError::Validation(
                    "column names cannot be empty".to_string(),
                ));
            }
            if !seen.insert(name) {
                return Err(BatchError::Validation(format!(
                    "duplicate column name '{}'",
                    name
                )));
            }
        }

        Ok(())
    }
}
