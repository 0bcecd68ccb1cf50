use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::capability::{PromptOverride, Role};
use crate::core::TaskKind;
use crate::{Error, Result};

/// Admission slots are counted in a semaphore and reclaimed in one
/// `acquire_many(u32)` on shutdown.
pub const MAX_CONCURRENT_QUERIES_LIMIT: usize = if Semaphore::MAX_PERMITS < u32::MAX as usize {
    Semaphore::MAX_PERMITS
} else {
    u32::MAX as usize
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_concurrent_queries: usize,
    pub max_concurrent_tasks: usize,
    /// Per-query deadline in seconds. 0 disables the deadline.
    pub query_timeout_secs: u64,
    pub cancel_grace_ms: u64,
    pub degraded_threshold: f64,
    pub retry: RetryConfig,
    pub tools: ToolsConfig,
    /// Keyed by role name: master, planner, executor, writer.
    pub prompts: HashMap<String, PromptOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 5,
            max_concurrent_tasks: 4,
            query_timeout_secs: 120,
            cancel_grace_ms: 2000,
            degraded_threshold: 0.3,
            retry: RetryConfig::default(),
            tools: ToolsConfig::default(),
            prompts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per capability after the first attempt.
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 200,
            max_backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Ordered capability names per task kind.
    pub fallback: HashMap<String, Vec<String>>,
    pub llm_fallback: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fallback: HashMap::new(),
            llm_fallback: true,
        }
    }
}

impl Config {
    pub fn swarm_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".swarm"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::swarm_dir()?.join("swarm.toml"))
    }

    /// Load from `~/.swarm/swarm.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config = Self::from_toml_str(&fs::read_to_string(path)?)?;
        debug!(
            max_concurrent_queries = config.max_concurrent_queries,
            max_concurrent_tasks = config.max_concurrent_tasks,
            query_timeout_secs = config.query_timeout_secs,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!(dir = %parent.display(), "Creating config directory");
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_queries == 0 {
            return Err(Error::Config("max_concurrent_queries must be at least 1".into()));
        }
        if self.max_concurrent_queries > MAX_CONCURRENT_QUERIES_LIMIT {
            return Err(Error::Config(format!(
                "max_concurrent_queries must be at most {}, got {}",
                MAX_CONCURRENT_QUERIES_LIMIT, self.max_concurrent_queries
            )));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Config("max_concurrent_tasks must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.degraded_threshold) {
            return Err(Error::Config(format!(
                "degraded_threshold must be within [0, 1], got {}",
                self.degraded_threshold
            )));
        }
        if self.retry.backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::Config(
                "retry.backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }
        self.fallback_order()?;
        self.prompt_overrides()?;
        Ok(())
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_secs > 0).then(|| Duration::from_secs(self.query_timeout_secs))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// `tools.fallback` with its keys parsed as task kinds.
    pub fn fallback_order(&self) -> Result<HashMap<TaskKind, Vec<String>>> {
        self.tools
            .fallback
            .iter()
            .map(|(k, v)| {
                let kind: TaskKind = k
                    .parse()
                    .map_err(|_| Error::Config(format!("unknown task kind in tools.fallback: {}", k)))?;
                Ok((kind, v.clone()))
            })
            .collect()
    }

    /// `prompts` with its keys parsed as roles.
    pub fn prompt_overrides(&self) -> Result<HashMap<Role, PromptOverride>> {
        self.prompts
            .iter()
            .map(|(k, v)| {
                let role = Role::ALL
                    .into_iter()
                    .find(|r| r.as_str() == k.to_lowercase())
                    .ok_or_else(|| Error::Config(format!("unknown prompt role: {}", k)))?;
                Ok((role, v.clone()))
            })
            .collect()
    }
}
