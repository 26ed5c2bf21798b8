//! Configuration module
//!
//! Combines the command-line flags with the runner settings read from the
//! environment.

use anyhow::{Context, Result};
use trawl_runner::RunnerConfig;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub runner: RunnerConfig,
}

impl Config {
    pub fn load(database_url: String) -> Result<Self> {
        let mut runner = RunnerConfig::from_env().context("Invalid runner configuration")?;
        runner.database_url = database_url;
        runner.validate()?;
        Ok(Self { runner })
    }
}
