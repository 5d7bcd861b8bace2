use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use super::error::ProcessError;

/// Grace period between interrupting a child and killing it
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessCommand {
    /// Render the command line for log messages
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ExitStatus::Success;
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }

        ExitStatus::Error(status.code().unwrap_or(-1))
    }
}

/// A child output stream handed to a producer
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Lifecycle of a long-running child process whose output gets intercepted.
///
/// `start` must make both output streams available through `take_stdout` and
/// `take_stderr`. `stop` must make the child close them so readers reach EOF.
#[async_trait]
pub trait ProcessLifecycle: Send + 'static {
    /// Short name used to label log files and log records
    fn name(&self) -> &str;

    async fn start(&mut self) -> Result<(), ProcessError>;

    async fn stop(&mut self) -> Result<(), ProcessError>;

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError>;

    fn take_stdout(&mut self) -> Option<BoxedReader>;

    fn take_stderr(&mut self) -> Option<BoxedReader>;

    fn is_running(&self) -> bool;
}

/// A real child process driven through `tokio::process`
pub struct ChildProcess {
    name: String,
    command: ProcessCommand,
    stop_grace_period: Duration,
    child: Option<Child>,
    running: bool,
    exit_status: Option<ExitStatus>,
}

impl ChildProcess {
    pub fn new(command: ProcessCommand) -> Self {
        let name = std::path::Path::new(&command.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(command.program.as_str())
            .to_string();

        Self {
            name,
            command,
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            child: None,
            running: false,
            exit_status: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace_period = grace;
        self
    }

    pub fn command(&self) -> &ProcessCommand {
        &self.command
    }

    /// OS process id while the child has not been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    /// Exit status once the child has been reaped
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// True while the child is started and has not exited yet
    pub fn is_alive(&mut self) -> bool {
        if !self.running {
            return false;
        }
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                self.exit_status = Some(status.into());
                false
            }
            _ => false,
        }
    }

    fn configure_command(&self) -> Command {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args);

        for (key, value) in &self.command.env {
            cmd.env(key, value);
        }

        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }

    fn log_command_start(&self) {
        tracing::info!("Launching {}: {}", self.name, self.command.display());

        if !self.command.env.is_empty() {
            tracing::trace!("Environment variables: {:?}", self.command.env);
        }
        if let Some(ref dir) = self.command.working_dir {
            tracing::trace!("Working directory: {:?}", dir);
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> Result<(), ProcessError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };

    kill(Pid::from_raw(pid as i32), Signal::SIGINT).map_err(|e| ProcessError::Signal {
        pid,
        message: e.to_string(),
    })
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> Result<(), ProcessError> {
    child.start_kill().map_err(ProcessError::Io)
}

#[async_trait]
impl ProcessLifecycle for ChildProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<(), ProcessError> {
        if self.running {
            return Err(ProcessError::AlreadyRunning(self.command.display()));
        }

        self.log_command_start();
        let child = self
            .configure_command()
            .spawn()
            .map_err(|e| ProcessError::spawn(self.command.display(), e))?;

        tracing::debug!("Spawned {} with pid {:?}", self.name, child.id());
        self.child = Some(child);
        self.exit_status = None;
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProcessError> {
        if !self.running {
            return Err(ProcessError::NotRunning(self.command.display()));
        }
        self.running = false;

        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        let command = self.command.display();
        if let Some(status) = child
            .try_wait()
            .map_err(|e| ProcessError::IoError {
                command: command.clone(),
                source: e,
            })?
        {
            tracing::debug!("{} already exited with {:?}", self.name, status);
            self.exit_status = Some(status.into());
            return Ok(());
        }

        if let Err(e) = interrupt(child) {
            tracing::warn!("Failed to interrupt {}: {}", self.name, e);
        }

        match tokio::time::timeout(self.stop_grace_period, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("{} exited with {:?}", self.name, status);
                self.exit_status = Some(status.into());
                Ok(())
            }
            Ok(Err(e)) => Err(ProcessError::IoError { command, source: e }),
            Err(_) => {
                tracing::warn!(
                    "{} ignored interrupt for {:?}, killing it",
                    self.name,
                    self.stop_grace_period
                );
                child
                    .kill()
                    .await
                    .map_err(|e| ProcessError::IoError { command, source: e })?;
                self.exit_status = child.try_wait().ok().flatten().map(Into::into);
                Ok(())
            }
        }
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }

        let command = self.command.display();
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| ProcessError::NotRunning(command.clone()))?;

        let status: ExitStatus = child
            .wait()
            .await
            .map_err(|e| ProcessError::IoError { command, source: e })?
            .into();
        self.exit_status = Some(status);
        Ok(status)
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        let stdout = self.child.as_mut()?.stdout.take()?;
        Some(Box::pin(stdout))
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        let stderr = self.child.as_mut()?.stderr.take()?;
        Some(Box::pin(stderr))
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
