//! On-disk configuration for the `gort` binary (§1, §6 ambient stack).
//! Everything here has a sane default; a `gort.toml` in the working
//! directory (or `$GORT_HOME/config/gort.toml`) overrides pieces of it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub backends: BackendConfig,
}

/// Worker-pool and dispatch tuning (§4.5).
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Concurrent execution slots. `None` uses the CPU x4, min-8 default.
    #[serde(default)]
    pub pool_size: Option<usize>,
    /// Default per-command deadline in seconds, absent a bundle/command
    /// override.
    #[serde(default = "default_deadline_secs")]
    pub default_deadline_secs: u64,
    /// Base URL injected as `GORT_SERVICES_ROOT` so commands can call
    /// back into the control plane.
    #[serde(default = "default_services_root")]
    pub services_root: String,
}

impl WorkerConfig {
    pub fn default_deadline(&self) -> Duration {
        Duration::from_secs(self.default_deadline_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: None,
            default_deadline_secs: default_deadline_secs(),
            services_root: default_services_root(),
        }
    }
}

fn default_deadline_secs() -> u64 {
    60
}

fn default_services_root() -> String {
    "http://127.0.0.1:8080".to_string()
}

/// Which remote execution backends to bring up alongside the always-on
/// local-process backend (§4.6). Both default to off: reaching a real
/// Docker daemon or Kubernetes cluster is an opt-in that should fail
/// loudly at startup, not silently at first dispatch.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub container_enabled: bool,
    #[serde(default)]
    pub pod_enabled: bool,
    #[serde(default)]
    pub pod_namespace: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub retention_days: Option<u64>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            directory: None,
            retention_days: None,
        }
    }
}

impl Config {
    /// Loads `gort.toml` from the working directory, falling back to
    /// `$GORT_HOME/config/gort.toml`, falling back to defaults.
    pub fn load() -> Result<Self> {
        let candidates = [Path::new("gort.toml").to_path_buf(), crate::paths::config_dir().join("gort.toml")];
        for path in candidates {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                let config: Config = toml::from_str(&content)?;
                return Ok(config);
            }
        }
        Ok(Config::default())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
            backends: BackendConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_worker_settings() {
        let config = Config::default();
        assert_eq!(config.worker.default_deadline(), Duration::from_secs(60));
        assert!(!config.backends.container_enabled);
        assert!(!config.backends.pod_enabled);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let toml_str = r#"
[worker]
pool_size = 16
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.worker.pool_size, Some(16));
        assert_eq!(config.worker.default_deadline_secs, 60);
    }
}
