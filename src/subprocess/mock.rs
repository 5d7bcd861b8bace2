use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{watch, Mutex};

use super::error::ProcessError;
use super::intercept::StreamSource;
use super::runner::{BoxedReader, ExitStatus, ProcessLifecycle};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Writing end of a [`MockProcess`]'s output streams.
///
/// Tests use it to play the child: write lines, close streams, exit.
#[derive(Clone)]
pub struct MockOutput {
    stdout: Arc<Mutex<Option<DuplexStream>>>,
    stderr: Arc<Mutex<Option<DuplexStream>>>,
    exit: Arc<watch::Sender<Option<ExitStatus>>>,
}

impl MockOutput {
    fn writer(&self, source: StreamSource) -> &Mutex<Option<DuplexStream>> {
        match source {
            StreamSource::Stdout => &self.stdout,
            StreamSource::Stderr => &self.stderr,
        }
    }

    /// Write `line` plus a newline to one stream
    pub async fn write_line(&self, source: StreamSource, line: &str) -> io::Result<()> {
        let mut guard = self.writer(source).lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, format!("{source} is closed"))
        })?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }

    /// Close one stream so its reader sees EOF
    pub async fn close(&self, source: StreamSource) {
        self.writer(source).lock().await.take();
    }

    /// Close both streams and report `status` to `wait`
    pub async fn exit(&self, status: ExitStatus) {
        self.close(StreamSource::Stdout).await;
        self.close(StreamSource::Stderr).await;
        self.exit.send_replace(Some(status));
    }
}

/// Scripted stand-in for a child process
pub struct MockProcess {
    name: String,
    running: bool,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
    output: MockOutput,
    hang_on_stop: bool,
    fail_stop: bool,
    fail_wait: bool,
    starts: usize,
    stops: usize,
}

impl MockProcess {
    pub fn new(name: &str) -> Self {
        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit, _) = watch::channel(None);

        Self {
            name: name.to_string(),
            running: false,
            stdout: Some(stdout_reader),
            stderr: Some(stderr_reader),
            output: MockOutput {
                stdout: Arc::new(Mutex::new(Some(stdout_writer))),
                stderr: Arc::new(Mutex::new(Some(stderr_writer))),
                exit: Arc::new(exit),
            },
            hang_on_stop: false,
            fail_stop: false,
            fail_wait: false,
            starts: 0,
            stops: 0,
        }
    }

    /// Ignore `stop`: the streams stay open and the child never exits
    pub fn hanging(mut self) -> Self {
        self.hang_on_stop = true;
        self
    }

    /// Make `stop` report a failure after closing the streams
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    /// Make `wait` fail instead of reporting an exit status
    pub fn failing_wait(mut self) -> Self {
        self.fail_wait = true;
        self
    }

    /// Expose no stderr stream
    pub fn without_stderr(mut self) -> Self {
        self.stderr = None;
        self
    }

    pub fn output(&self) -> MockOutput {
        self.output.clone()
    }

    pub fn start_count(&self) -> usize {
        self.starts
    }

    pub fn stop_count(&self) -> usize {
        self.stops
    }
}

#[async_trait]
impl ProcessLifecycle for MockProcess {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<(), ProcessError> {
        if self.running {
            return Err(ProcessError::AlreadyRunning(self.name.clone()));
        }
        self.running = true;
        self.starts += 1;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProcessError> {
        if !self.running {
            return Err(ProcessError::NotRunning(self.name.clone()));
        }
        self.running = false;
        self.stops += 1;

        if self.hang_on_stop {
            return Ok(());
        }

        // SIGINT
        self.output.exit(ExitStatus::Signal(2)).await;
        if self.fail_stop {
            return Err(ProcessError::Io(io::Error::other("mock stop failure")));
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if self.fail_wait {
            return Err(ProcessError::Io(io::Error::other("mock wait failure")));
        }
        let mut exit = self.output.exit.subscribe();
        let status = *exit
            .wait_for(|status| status.is_some())
            .await
            .map_err(|e| ProcessError::Io(io::Error::other(e.to_string())))?;
        Ok(status.unwrap_or(ExitStatus::Success))
    }

    fn take_stdout(&mut self) -> Option<BoxedReader> {
        self.stdout.take().map(|s| Box::pin(s) as BoxedReader)
    }

    fn take_stderr(&mut self) -> Option<BoxedReader> {
        self.stderr.take().map(|s| Box::pin(s) as BoxedReader)
    }

    fn is_running(&self) -> bool {
        self.running
    }
}
