//! Interception settings, loadable from TOML

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::subprocess::runner::DEFAULT_STOP_GRACE_PERIOD;

/// Default bound on draining one relay queue during shutdown
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptConfig {
    /// Name used in default log file names
    pub process_name: String,
    /// Directory for default log files
    pub log_dir: PathBuf,
    /// Explicit stdout log file
    pub stdout_log: Option<PathBuf>,
    /// Explicit stderr log file
    pub stderr_log: Option<PathBuf>,
    /// How long `stop` spends on the relays once the process is stopped
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
    /// Time between interrupting and killing the child
    #[serde(with = "humantime_serde")]
    pub stop_grace_period: Duration,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            process_name: "process".to_string(),
            log_dir: PathBuf::from("logs"),
            stdout_log: None,
            stderr_log: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
        }
    }
}

impl InterceptConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse interception config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}
