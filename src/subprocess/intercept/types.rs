//! Core types shared by the interception pipeline

use std::fmt;

use super::error::InterceptError;

/// Which output stream of the child a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl StreamSource {
    pub const ALL: [StreamSource; 2] = [StreamSource::Stdout, StreamSource::Stderr];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamSource::Stdout => "stdout",
            StreamSource::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a [`Pipeline`](super::Pipeline). `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Idle => "idle",
            PipelineState::Running => "running",
            PipelineState::Stopping => "stopping",
            PipelineState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// One entry of a relay queue
#[derive(Debug)]
pub enum RelayEntry {
    /// A line of child output, terminator included
    Line(String),
    /// Deliberate end of the stream, enqueued once by the shutdown path
    Sentinel,
    /// A failure on the producing side, raised by the consumer
    Error(InterceptError),
}

impl RelayEntry {
    pub fn line(line: impl Into<String>) -> Self {
        RelayEntry::Line(line.into())
    }

    pub fn is_sentinel(&self) -> bool {
        matches!(self, RelayEntry::Sentinel)
    }
}
