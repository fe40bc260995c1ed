//! Engine configuration.
//!
//! Defaults mirror the documented scheduling bounds; values can be
//! overridden from an optional TOML file and `CONDUCTOR_*` environment
//! variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

fn default_max_concurrent() -> usize {
    10
}

fn default_retry_ceiling() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_critical_pass_limit() -> u32 {
    10
}

fn default_executor_timeout_secs() -> u64 {
    600
}

fn default_abort_grace_secs() -> u64 {
    30
}

/// Configuration for one orchestration engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global cap on simultaneously executing tasks.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-run ceiling on auto-retry attempts across all tasks.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Default per-issue retry bound for escalated issues.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum critical-loop passes before the run halts with an error.
    #[serde(default = "default_critical_pass_limit")]
    pub critical_pass_limit: u32,

    /// Bound on waiting for one executor completion signal. Exceeding it
    /// is an infrastructure fault, not a task failure.
    #[serde(default = "default_executor_timeout_secs")]
    pub executor_timeout_secs: u64,

    /// Grace period granted to in-flight executors on abort.
    #[serde(default = "default_abort_grace_secs")]
    pub abort_grace_secs: u64,

    /// Directory holding the persisted task/issue stores. In-memory when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retry_ceiling: default_retry_ceiling(),
            max_retries: default_max_retries(),
            critical_pass_limit: default_critical_pass_limit(),
            executor_timeout_secs: default_executor_timeout_secs(),
            abort_grace_secs: default_abort_grace_secs(),
            state_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from an optional TOML file plus `CONDUCTOR_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        builder = builder.add_source(Environment::with_prefix("CONDUCTOR").try_parsing(true));

        let settings = builder
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        settings
            .try_deserialize()
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor_timeout_secs)
    }

    pub fn abort_grace(&self) -> Duration {
        Duration::from_secs(self.abort_grace_secs)
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_critical_pass_limit(mut self, limit: u32) -> Self {
        self.critical_pass_limit = limit;
        self
    }

    pub fn with_executor_timeout(mut self, timeout: Duration) -> Self {
        self.executor_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_abort_grace(mut self, grace: Duration) -> Self {
        self.abort_grace_secs = grace.as_secs();
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_bounds() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.retry_ceiling, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.critical_pass_limit, 10);
        assert_eq!(config.executor_timeout(), Duration::from_secs(600));
        assert_eq!(config.abort_grace(), Duration::from_secs(30));
        assert!(config.state_dir.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let config = EngineConfig::new()
            .with_max_concurrent(3)
            .with_retry_ceiling(2)
            .with_max_retries(1)
            .with_critical_pass_limit(4)
            .with_executor_timeout(Duration::from_secs(5))
            .with_abort_grace(Duration::from_secs(1));

        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.retry_ceiling, 2);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.critical_pass_limit, 4);
        assert_eq!(config.executor_timeout(), Duration::from_secs(5));
        assert_eq!(config.abort_grace(), Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::TempDir::new().expect("temp dir");
        let path = dir.path().join("conductor.toml");
        std::fs::write(&path, "max_concurrent = 4\nretry_ceiling = 7\n").expect("write config");

        let config = EngineConfig::load(Some(&path)).expect("load");
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.retry_ceiling, 7);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = EngineConfig::load(None).expect("load");
        assert_eq!(config, EngineConfig::default());
    }
}
