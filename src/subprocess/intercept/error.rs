use std::time::Duration;

use super::types::{PipelineState, StreamSource};
use crate::subprocess::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("Cannot {operation} a pipeline that is {state}")]
    InvalidState {
        operation: &'static str,
        state: PipelineState,
    },

    #[error("Process handle exposes no {0} stream")]
    MissingStream(StreamSource),

    #[error("Relay queue is already being consumed")]
    AlreadyConsumed,

    #[error("Relay queue received an entry after its end-of-stream marker")]
    EnqueueAfterSentinel,

    #[error("Relay queue did not drain within {0:?}")]
    DrainTimeout(Duration),

    #[error("Relay queue reader ended with {0} entries unhandled")]
    ReaderClosed(usize),

    #[error("Failed to read {source_stream} of the child: {source}")]
    Read {
        source_stream: StreamSource,
        #[source]
        source: std::io::Error,
    },

    #[error("Sink failed on {source_stream} line: {source}")]
    Sink {
        source_stream: StreamSource,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0} task panicked or was aborted")]
    TaskFailed(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InterceptError {
    /// True for misuse of the pipeline API as opposed to runtime conditions
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            InterceptError::InvalidState { .. }
                | InterceptError::MissingStream(_)
                | InterceptError::AlreadyConsumed
                | InterceptError::EnqueueAfterSentinel
        )
    }
}
