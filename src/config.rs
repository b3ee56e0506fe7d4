//! Strand Configuration Module
//!
//! Runtime limits and defaults, stored in `~/.config/strand/config.toml`.
//! A missing file yields the defaults; the CLI `--config` flag overrides
//! the path.
//!
//! ## Example
//!
//! ```toml
//! [scheduler]
//! max_concurrent_tasks = 8
//!
//! [scheduler.max_per_kind]
//! agent = 4
//!
//! [scheduler.max_per_resource]
//! "agent:gpt" = 2
//!
//! [scheduler.rate_limits."agent:gpt"]
//! capacity = 10
//! refill = 5
//! interval_ms = 1000
//!
//! [defaults]
//! node_timeout_ms = 30000
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};
use crate::sched::SchedulerConfig;

/// Defaults applied to nodes that leave a knob unset
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeDefaults {
    /// Timeout for nodes without `timeout_ms`
    pub node_timeout_ms: Option<u64>,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub defaults: NodeDefaults,
}

impl RuntimeConfig {
    /// Config directory (`~/.config/strand/` on Unix)
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strand")
    }

    /// Default config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load from the default path; a missing file yields defaults
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| StrandError::ConfigError {
            reason: e.to_string(),
        })
    }

    /// Persist to the default path, creating the directory
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir();
        fs::create_dir_all(&dir)?;
        let text = toml::to_string_pretty(self).map_err(|e| StrandError::ConfigError {
            reason: e.to_string(),
        })?;
        fs::write(Self::config_path(), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_engine_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.scheduler.max_concurrent_tasks, 16);
        assert!(config.defaults.node_timeout_ms.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = RuntimeConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.scheduler.max_concurrent_tasks, 16);
    }

    #[test]
    fn parses_full_config() {
        let toml_text = r#"
[scheduler]
max_concurrent_tasks = 8

[scheduler.max_per_kind]
agent = 4
tool = 6

[scheduler.max_per_resource]
"agent:gpt" = 2

[scheduler.rate_limits."agent:gpt"]
capacity = 10
refill = 5
interval_ms = 1000

[defaults]
node_timeout_ms = 30000
"#;
        let config: RuntimeConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(config.scheduler.max_concurrent_tasks, 8);
        assert_eq!(config.scheduler.max_per_kind.get("agent"), Some(&4));
        assert_eq!(
            config.scheduler.max_per_resource.get("agent:gpt"),
            Some(&2)
        );
        let limit = config.scheduler.rate_limits.get("agent:gpt").unwrap();
        assert_eq!(limit.capacity, 10);
        assert_eq!(config.defaults.node_timeout_ms, Some(30_000));
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not [valid toml").unwrap();
        let err = RuntimeConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("STRAND-101"));
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = RuntimeConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: RuntimeConfig = toml::from_str(&text).unwrap();
        assert_eq!(
            back.scheduler.max_concurrent_tasks,
            config.scheduler.max_concurrent_tasks
        );
    }
}
