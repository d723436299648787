// corpus-core/src/config.rs
//! Run configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings shared by every run the core executes
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunConfig {
    pub scheduler: SchedulerConfig,
    pub aggregation: CapPolicy,
    /// Upper bound on shards scanned concurrently in simultaneous mode
    pub max_in_flight: usize,
    /// A run with no completed unit of work for this long times out
    pub job_timeout_secs: u64,
}

/// Tuning for the proportional shard picker
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SchedulerConfig {
    /// Extra fraction a shard's expected matches must exceed the remainder by
    pub safety_buffer: f64,
    /// Below this many results, take the next smallest shard for a fast first page
    pub first_page_floor: u64,
}

/// Which result-set kinds are enumerable (capped) rather than aggregate
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CapPolicy {
    pub enumerable_kinds: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            aggregation: CapPolicy::default(),
            max_in_flight: 4,
            job_timeout_secs: 300,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            safety_buffer: 0.1,
            first_page_floor: 25,
        }
    }
}

impl Default for CapPolicy {
    fn default() -> Self {
        Self {
            enumerable_kinds: vec!["plain".to_string()],
        }
    }
}

impl CapPolicy {
    pub fn is_enumerable(&self, kind: &str) -> bool {
        self.enumerable_kinds.iter().any(|k| k == kind)
    }
}

impl RunConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// 从 TOML 文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        if config.max_in_flight == 0 {
            return Err(ConfigError::Invalid("max-in-flight must be at least 1".into()));
        }
        if config.job_timeout_secs == 0 {
            return Err(ConfigError::Invalid("job-timeout-secs must be at least 1".into()));
        }
        Ok(config)
    }

    /// 尝试加载配置，失败则使用默认值
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("invalid run configuration: {0}")]
    Invalid(String),
}
