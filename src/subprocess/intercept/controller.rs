//! Interception controller
//!
//! A [`Pipeline`] owns one relay queue, producer task and consumer task per
//! output stream, and drives them around the start and stop of a process:
//!
//! ```text
//! child stdout ─► producer ─► RelayQueue ─► consumer ─► stdout sinks
//! child stderr ─► producer ─► RelayQueue ─► consumer ─► stderr sinks
//! ```
//!
//! `stop` stops the process first. Everything after that shares one deadline,
//! [`InterceptConfig::drain_timeout`] from then: the producers get until the
//! deadline to hit EOF, then both queues are sealed and drained, then the
//! tasks are joined. Whatever misses the deadline is logged and detached, so
//! trailing lines may be lost but `stop` returns within the budget.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::config::InterceptConfig;
use super::consumer::consume;
use super::error::InterceptError;
use super::producer::produce;
use super::queue::RelayQueue;
use super::sink::{SharedSink, SinkRegistry};
use super::types::{PipelineState, StreamSource};
use crate::subprocess::runner::{BoxedReader, ProcessLifecycle};

/// Outcome of one stream's shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Lines read from the child, `None` if the producer did not finish in time
    pub produced: Option<usize>,
    /// Lines every sink accepted
    pub delivered: usize,
    /// Whether every line read from the child reached the sinks in time
    pub drained: bool,
    /// Failure reported by the producer or consumer task
    pub error: Option<String>,
}

impl StreamReport {
    pub fn is_clean(&self) -> bool {
        self.drained && self.error.is_none() && self.produced.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    pub stdout: StreamReport,
    pub stderr: StreamReport,
}

impl StopReport {
    pub fn stream(&self, source: StreamSource) -> &StreamReport {
        match source {
            StreamSource::Stdout => &self.stdout,
            StreamSource::Stderr => &self.stderr,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.stdout.is_clean() && self.stderr.is_clean()
    }
}

struct StreamRelay {
    source: StreamSource,
    queue: RelayQueue,
    producer: Option<JoinHandle<usize>>,
    consumer: Option<JoinHandle<Result<usize, InterceptError>>>,
}

impl StreamRelay {
    fn new(source: StreamSource) -> Self {
        Self {
            source,
            queue: RelayQueue::new(),
            producer: None,
            consumer: None,
        }
    }

    fn spawn(&mut self, stream: BoxedReader, sinks: SinkRegistry) -> Result<(), InterceptError> {
        let receiver = self.queue.iterate()?;
        self.consumer = Some(tokio::spawn(consume(receiver, self.source, sinks)));
        self.producer = Some(tokio::spawn(produce(stream, self.source, self.queue.clone())));
        Ok(())
    }

    /// Wind the relay down by `deadline`.
    ///
    /// The producer gets until the deadline to reach EOF. A child that keeps
    /// its pipe open uses up the budget here; the queue then counts as
    /// drained if every line read so far was already handled.
    async fn shut_down(&mut self, deadline: Instant) -> StreamReport {
        let mut report = StreamReport::default();

        if let Some(handle) = self.producer.take() {
            match join_until(handle, deadline, self.source, "producer").await {
                Ok(produced) => report.produced = produced,
                Err(e) => report.error = Some(e.to_string()),
            }
        }

        let idle = self.queue.is_empty();
        if let Err(e) = self.queue.seal() {
            tracing::warn!("Could not seal {} relay: {}", self.source, e);
        }

        report.drained = match self.queue.drain_until(deadline).await {
            Ok(()) => true,
            Err(_) if idle => true,
            Err(e) => {
                tracing::warn!(
                    "{} relay still holds {} entries: {}",
                    self.source,
                    self.queue.len(),
                    e
                );
                false
            }
        };

        if let Some(handle) = self.consumer.take() {
            match join_until(handle, deadline, self.source, "consumer").await {
                Ok(Some(Ok(_))) | Ok(None) => {}
                Ok(Some(Err(e))) => {
                    tracing::warn!("{} consumer failed: {}", self.source, e);
                    report.error = Some(e.to_string());
                }
                Err(e) => {
                    report.error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        report.delivered = self.queue.delivered();
        report
    }
}

/// Join `handle` unless `deadline` passes first, in which case the task is
/// left running detached and `Ok(None)` is returned.
async fn join_until<T>(
    mut handle: JoinHandle<T>,
    deadline: Instant,
    source: StreamSource,
    role: &str,
) -> Result<Option<T>, InterceptError> {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(value)) => Ok(Some(value)),
        Ok(Err(e)) => {
            tracing::warn!("{} {} task failed: {}", source, role, e);
            Err(InterceptError::TaskFailed(format!("{source} {role}")))
        }
        Err(_) => {
            tracing::warn!("{} {} did not finish in time, detaching it", source, role);
            Ok(None)
        }
    }
}

/// Output interception around one process
pub struct Pipeline<P: ProcessLifecycle> {
    process: Arc<Mutex<P>>,
    config: InterceptConfig,
    sinks: SinkRegistry,
    state: PipelineState,
    stdout: StreamRelay,
    stderr: StreamRelay,
}

impl<P: ProcessLifecycle> Pipeline<P> {
    pub fn new(process: P, config: InterceptConfig) -> Self {
        Self::with_shared_process(Arc::new(Mutex::new(process)), config)
    }

    /// Build a pipeline around a process handle the caller keeps sharing
    pub fn with_shared_process(process: Arc<Mutex<P>>, config: InterceptConfig) -> Self {
        Self {
            process,
            config,
            sinks: SinkRegistry::new(),
            state: PipelineState::Idle,
            stdout: StreamRelay::new(StreamSource::Stdout),
            stderr: StreamRelay::new(StreamSource::Stderr),
        }
    }

    pub fn process(&self) -> Arc<Mutex<P>> {
        Arc::clone(&self.process)
    }

    pub fn config(&self) -> &InterceptConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.sinks
    }

    /// Relay queue of one stream
    pub fn queue(&self, source: StreamSource) -> &RelayQueue {
        &self.relay(source).queue
    }

    fn relay(&self, source: StreamSource) -> &StreamRelay {
        match source {
            StreamSource::Stdout => &self.stdout,
            StreamSource::Stderr => &self.stderr,
        }
    }

    /// Append a sink for one stream.
    ///
    /// Meant to be called before [`start`](Self::start). Registering while
    /// running is allowed, but which in-flight lines reach the new sink is
    /// not defined.
    pub fn register(&self, source: StreamSource, sink: SharedSink) {
        self.sinks.register(source, sink);
    }

    pub fn register_stdout(&self, sink: SharedSink) {
        self.register(StreamSource::Stdout, sink);
    }

    pub fn register_stderr(&self, sink: SharedSink) {
        self.register(StreamSource::Stderr, sink);
    }

    /// Start the process and the four relay tasks
    pub async fn start(&mut self) -> Result<(), InterceptError> {
        if self.state != PipelineState::Idle {
            return Err(InterceptError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        let (name, stdout, stderr) = {
            let mut process = self.process.lock().await;
            process.start().await?;
            let stdout = process.take_stdout();
            let stderr = process.take_stderr();
            (process.name().to_string(), stdout, stderr)
        };

        let (stdout, stderr) = match (stdout, stderr) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            (stdout, _) => {
                let missing = if stdout.is_none() {
                    StreamSource::Stdout
                } else {
                    StreamSource::Stderr
                };
                self.abandon_start(&name).await;
                return Err(InterceptError::MissingStream(missing));
            }
        };

        self.stdout.spawn(stdout, self.sinks.clone())?;
        self.stderr.spawn(stderr, self.sinks.clone())?;
        self.state = PipelineState::Running;

        tracing::debug!(
            "Intercepting {} with {} stdout and {} stderr sinks",
            name,
            self.sinks.len(StreamSource::Stdout),
            self.sinks.len(StreamSource::Stderr)
        );
        Ok(())
    }

    async fn abandon_start(&mut self, name: &str) {
        if let Err(e) = self.process.lock().await.stop().await {
            tracing::warn!("Failed to stop {} after aborted start: {}", name, e);
        }
        self.state = PipelineState::Stopped;
    }

    /// Stop the process, then drain and join the relays.
    ///
    /// After the process stop returns, the relays get
    /// [`InterceptConfig::drain_timeout`] in total. Queues that do not drain
    /// in time are reported in the [`StopReport`] rather than as an error. A
    /// failure to stop the process is returned after the pipeline has fully
    /// shut down.
    pub async fn stop(&mut self) -> Result<StopReport, InterceptError> {
        if self.state != PipelineState::Running {
            return Err(InterceptError::InvalidState {
                operation: "stop",
                state: self.state,
            });
        }
        self.state = PipelineState::Stopping;

        let process_result = self.process.lock().await.stop().await;
        if let Err(ref e) = process_result {
            tracing::warn!("Failed to stop process: {}", e);
        }

        let deadline = Instant::now() + self.config.drain_timeout;
        let (stdout, stderr) = tokio::join!(
            self.stdout.shut_down(deadline),
            self.stderr.shut_down(deadline)
        );
        let report = StopReport { stdout, stderr };

        for source in StreamSource::ALL {
            self.sinks.flush(source);
        }
        self.state = PipelineState::Stopped;
        tracing::debug!("Pipeline stopped: {:?}", report);

        process_result?;
        Ok(report)
    }
}

impl<P: ProcessLifecycle> Drop for Pipeline<P> {
    fn drop(&mut self) {
        if self.state == PipelineState::Running {
            tracing::warn!("Pipeline dropped while running; relay tasks are left detached");
        }
    }
}
