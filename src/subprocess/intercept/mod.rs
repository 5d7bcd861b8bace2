//! Interception of a child process's output streams
//!
//! Each line the child writes to stdout or stderr is read by a producer task,
//! relayed through an unbounded queue and handed by a consumer task to every
//! sink registered for that stream, in registration order. Shutdown is
//! data-driven: producers end at EOF, consumers end at the queue's sentinel,
//! and waiting on either is bounded by a timeout.

pub mod config;
pub mod consumer;
pub mod controller;
pub mod error;
pub mod logging_sink;
pub mod producer;
pub mod queue;
pub mod sink;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{InterceptConfig, DEFAULT_DRAIN_TIMEOUT};
pub use controller::{Pipeline, StopReport, StreamReport};
pub use error::InterceptError;
pub use logging_sink::{FileLineSink, LoggingSink, LoggingSinkOptions, Severity};
pub use queue::{RelayQueue, RelayReceiver};
pub use sink::{LineSink, MemorySink, SharedSink, SinkRegistry};
pub use types::{PipelineState, RelayEntry, StreamSource};
