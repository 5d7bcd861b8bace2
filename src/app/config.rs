//! Application configuration
//!
//! Settings of the binary itself, as opposed to the interception settings in
//! [`InterceptConfig`].

use anyhow::Result;
use std::path::PathBuf;

use crate::subprocess::intercept::InterceptConfig;

/// Application configuration structure
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// Verbosity level for logging
    pub verbose: u8,
    /// Interception config file, if any
    pub config_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn new(verbose: u8) -> Self {
        Self {
            verbose,
            config_file: None,
        }
    }

    /// Set the interception config file
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    /// Get the log level string based on verbosity
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            2 => "trace",
            _ => "trace,tokio=debug",
        }
    }

    /// Interception settings from the config file, or defaults without one
    pub fn intercept_config(&self) -> Result<InterceptConfig> {
        match &self.config_file {
            Some(path) => InterceptConfig::load(path),
            None => Ok(InterceptConfig::default()),
        }
    }
}
