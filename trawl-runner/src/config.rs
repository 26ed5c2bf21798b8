//! Runner configuration
//!
//! Timeouts, retry backoff and background intervals used by the batch
//! scheduler and the cleanup sweep.

use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// SQLite location of the job store (e.g., "sqlite://trawl.db")
    pub database_url: String,

    /// How long a hidden tab may take to report load completion
    pub page_load_timeout: Duration,

    /// How long an extraction request may stay unanswered
    pub extraction_timeout: Duration,

    /// Backoff base; the delay before retry `n` is `min(base * 2^n, cap)`
    pub retry_base: Duration,

    /// Upper bound of any single backoff delay
    pub retry_cap: Duration,

    /// How often a scheduler re-reads its job when no change event arrives
    pub poll_interval: Duration,

    /// Period of the cleanup sweep
    pub sweep_interval: Duration,

    /// Age after which an ephemeral job whose origin tab is gone is reclaimed
    pub ephemeral_retention: Duration,
}

impl RunnerConfig {
    pub fn new(database_url: String) -> Self {
        Self {
            database_url,
            page_load_timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(30),
            retry_base: Duration::from_secs(1),
            retry_cap: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            ephemeral_retention: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - TRAWL_DATABASE_URL (default: sqlite://trawl.db)
    /// - TRAWL_PAGE_LOAD_TIMEOUT_MS (default: 30000)
    /// - TRAWL_EXTRACTION_TIMEOUT_MS (default: 30000)
    /// - TRAWL_RETRY_BASE_MS (default: 1000)
    /// - TRAWL_RETRY_CAP_MS (default: 30000)
    /// - TRAWL_POLL_INTERVAL_MS (default: 500)
    /// - TRAWL_SWEEP_INTERVAL_SECS (default: 60)
    /// - TRAWL_EPHEMERAL_RETENTION_SECS (default: 86400)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let database_url =
            std::env::var("TRAWL_DATABASE_URL").unwrap_or(defaults.database_url);

        let config = Self {
            database_url,
            page_load_timeout: env_millis("TRAWL_PAGE_LOAD_TIMEOUT_MS")?
                .unwrap_or(defaults.page_load_timeout),
            extraction_timeout: env_millis("TRAWL_EXTRACTION_TIMEOUT_MS")?
                .unwrap_or(defaults.extraction_timeout),
            retry_base: env_millis("TRAWL_RETRY_BASE_MS")?.unwrap_or(defaults.retry_base),
            retry_cap: env_millis("TRAWL_RETRY_CAP_MS")?.unwrap_or(defaults.retry_cap),
            poll_interval: env_millis("TRAWL_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            sweep_interval: env_secs("TRAWL_SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval),
            ephemeral_retention: env_secs("TRAWL_EPHEMERAL_RETENTION_SECS")?
                .unwrap_or(defaults.ephemeral_retention),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if !self.database_url.starts_with("sqlite:") {
            anyhow::bail!("database_url must start with sqlite:");
        }

        if self.page_load_timeout.is_zero() {
            anyhow::bail!("page_load_timeout must be greater than 0");
        }

        if self.extraction_timeout.is_zero() {
            anyhow::bail!("extraction_timeout must be greater than 0");
        }

        if self.retry_cap < self.retry_base {
            anyhow::bail!("retry_cap must not be smaller than retry_base");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.sweep_interval.is_zero() {
            anyhow::bail!("sweep_interval must be greater than 0");
        }

        Ok(())
    }

    /// Delay before re-queuing a task whose `attempt` just failed
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.retry_base
            .checked_mul(factor)
            .unwrap_or(self.retry_cap)
            .min(self.retry_cap)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new("sqlite://trawl.db".to_string())
    }
}

fn env_millis(name: &str) -> anyhow::Result<Option<Duration>> {
    env_u64(name).map(|v| v.map(Duration::from_millis))
}

fn env_secs(name: &str) -> anyhow::Result<Option<Duration>> {
    env_u64(name).map(|v| v.map(Duration::from_secs))
}

fn env_u64(name: &str) -> anyhow::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a non-negative integer: {}", name, e)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.page_load_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_base, Duration::from_secs(1));
        assert_eq!(config.retry_cap, Duration::from_secs(30));
        assert_eq!(config.ephemeral_retention, Duration::from_secs(86400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunnerConfig::default();

        config.database_url = "postgres://localhost/trawl".to_string();
        assert!(config.validate().is_err());
        config.database_url = "sqlite::memory:".to_string();
        assert!(config.validate().is_ok());

        config.retry_cap = Duration::from_millis(10);
        assert!(config.validate().is_err());
        config.retry_cap = Duration::from_secs(30);

        config.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = RunnerConfig::default();
        assert_eq!(config.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(config.backoff_delay(5), Duration::from_secs(30));
        assert_eq!(config.backoff_delay(40), Duration::from_secs(30));
    }
}
