//! Batch settings

use serde::{Deserialize, Serialize};

use crate::error::{BatchError, Result};

pub const MAX_CONCURRENCY_RANGE: std::ops::RangeInclusive<u32> = 1..=10;
pub const DELAY_BETWEEN_REQUESTS_RANGE: std::ops::RangeInclusive<u64> = 0..=10_000;
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 0..=10;

/// Per-job scheduling settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSettings {
    /// Maximum number of hidden tabs open at once
    pub max_concurrency: u32,
    /// Minimum spacing between two admissions
    pub delay_between_requests_ms: u64,
    /// Retries allowed after the first failed attempt
    pub max_retries: u32,
    pub disable_js_rendering: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            delay_between_requests_ms: 1000,
            max_retries: 2,
            disable_js_rendering: false,
        }
    }
}

impl BatchSettings {
    /// Validates every setting against its allowed range
    pub fn validate(&self) -> Result<()> {
        if !MAX_CONCURRENCY_RANGE.contains(&self.max_concurrency) {
            return Err(BatchError::Validation(format!(
                "maxConcurrency must be within {:?}, got {}",
                MAX_CONCURRENCY_RANGE, self.max_concurrency
            )));
        }

        if !DELAY_BETWEEN_REQUESTS_RANGE.contains(&self.delay_between_requests_ms) {
            return Err(BatchError::Validation(format!(
                "delayBetweenRequestsMs must be within {:?}, got {}",
                DELAY_BETWEEN_REQUESTS_RANGE, self.delay_between_requests_ms
            )));
        }

        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            return Err(BatchError::Validation(format!(
                "maxRetries must be within {:?}, got {}",
                MAX_RETRIES_RANGE, self.max_retries
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(BatchSettings::default().validate().is_ok());
    }

    #[test]
    fn test_range_boundaries() {
        let mut settings = BatchSettings {
            max_concurrency: 10,
            delay_between_requests_ms: 10_000,
            max_retries: 10,
            disable_js_rendering: true,
        };
        assert!(settings.validate().is_ok());

        settings.max_concurrency = 0;
        assert!(settings.validate().is_err());
        settings.max_concurrency = 11;
        assert!(settings.validate().is_err());
        settings.max_concurrency = 1;

        settings.delay_between_requests_ms = 10_001;
        assert!(settings.validate().is_err());
        settings.delay_between_requests_ms = 0;

        settings.max_retries = 11;
        assert!(settings.validate().is_err());
        settings.max_retries = 0;
        assert!(settings.validate().is_ok());
    }
}
