//! Log-file sinks for intercepted output
//!
//! Every stream gets its own append-only file holding one line per record
//! with no framing. By default the files are named
//! `<log_dir>/<process-name>-<YYYYMMDD-HHMMSS>-<stdout|stderr>.log`.
//! Records logged at [`Severity::Error`] are also echoed to the console
//! through `tracing`.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::config::InterceptConfig;
use super::controller::Pipeline;
use super::sink::{LineSink, SharedSink, SinkRegistry};
use super::types::StreamSource;
use crate::subprocess::runner::ProcessLifecycle;

/// Severity of a record; `Error` and above reach the console
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Error,
}

/// Build the default log path for one stream, creating `log_dir` if needed
pub fn construct_log_file_path(
    log_dir: &Path,
    process_name: &str,
    source: StreamSource,
) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    Ok(log_dir.join(format!("{process_name}-{timestamp}-{source}.log")))
}

#[derive(Debug, Clone)]
pub struct LoggingSinkOptions {
    pub process_name: String,
    pub log_dir: PathBuf,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

impl LoggingSinkOptions {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            log_dir: PathBuf::from("logs"),
            stdout_path: None,
            stderr_path: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_stdout_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    pub fn with_stderr_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_path = Some(path.into());
        self
    }

    fn path_for(&self, source: StreamSource) -> std::io::Result<PathBuf> {
        let explicit = match source {
            StreamSource::Stdout => &self.stdout_path,
            StreamSource::Stderr => &self.stderr_path,
        };
        match explicit {
            Some(path) => Ok(path.clone()),
            None => construct_log_file_path(&self.log_dir, &self.process_name, source),
        }
    }
}

impl From<&InterceptConfig> for LoggingSinkOptions {
    fn from(config: &InterceptConfig) -> Self {
        Self {
            process_name: config.process_name.clone(),
            log_dir: config.log_dir.clone(),
            stdout_path: config.stdout_log.clone(),
            stderr_path: config.stderr_log.clone(),
        }
    }
}

/// Appends the lines of one stream to a file
pub struct FileLineSink {
    source: StreamSource,
    path: PathBuf,
    writer: Mutex<LineWriter<File>>,
}

impl FileLineSink {
    pub fn open(path: impl Into<PathBuf>, source: StreamSource) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {} log file {}", source, path.display()))?;

        tracing::debug!("Logging {} to {}", source, path.display());
        Ok(Self {
            source,
            path,
            writer: Mutex::new(LineWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, severity: Severity, line: &str) -> Result<()> {
        {
            let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            writeln!(writer, "{line}")
                .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        }

        if severity >= Severity::Error {
            tracing::error!(target: "procrelay::child", stream = %self.source, "{}", line);
        }
        Ok(())
    }
}

impl LineSink for FileLineSink {
    fn on_line(&self, line: &str) -> Result<()> {
        self.log(Severity::Info, line)
    }

    fn flush(&self) -> Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .flush()
            .with_context(|| format!("Failed to flush {}", self.path.display()))
    }
}

struct ErrorLevel(Arc<FileLineSink>);

impl LineSink for ErrorLevel {
    fn on_line(&self, line: &str) -> Result<()> {
        self.0.log(Severity::Error, line)
    }

    fn flush(&self) -> Result<()> {
        self.0.flush()
    }
}

/// A pair of per-run log files, one per stream.
///
/// Files are opened once here and closed when the last sink referencing them
/// is dropped.
pub struct LoggingSink {
    stdout: Arc<FileLineSink>,
    stderr: Arc<FileLineSink>,
}

impl LoggingSink {
    pub fn new(options: &LoggingSinkOptions) -> Result<Self> {
        let stdout = FileLineSink::open(options.path_for(StreamSource::Stdout)?, StreamSource::Stdout)?;
        let stderr = FileLineSink::open(options.path_for(StreamSource::Stderr)?, StreamSource::Stderr)?;
        Ok(Self {
            stdout: Arc::new(stdout),
            stderr: Arc::new(stderr),
        })
    }

    fn file(&self, source: StreamSource) -> &Arc<FileLineSink> {
        match source {
            StreamSource::Stdout => &self.stdout,
            StreamSource::Stderr => &self.stderr,
        }
    }

    pub fn path(&self, source: StreamSource) -> &Path {
        self.file(source).path()
    }

    /// Sink writing to the stream's file only
    pub fn info_sink(&self, source: StreamSource) -> SharedSink {
        self.file(source).clone()
    }

    /// Sink writing to the stream's file and the console
    pub fn error_sink(&self, source: StreamSource) -> SharedSink {
        Arc::new(ErrorLevel(self.file(source).clone()))
    }

    /// Register the file-only sinks for both streams
    pub fn register(&self, registry: &SinkRegistry) {
        for source in StreamSource::ALL {
            registry.register(source, self.info_sink(source));
        }
    }

    /// Register the file-only sinks for both streams of `pipeline`
    pub fn register_with<P: ProcessLifecycle>(&self, pipeline: &Pipeline<P>) {
        self.register(pipeline.sinks());
    }
}
