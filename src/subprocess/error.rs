#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Process is already running: {0}")]
    AlreadyRunning(String),

    #[error("Process is not running: {0}")]
    NotRunning(String),

    #[error("Failed to deliver signal to process {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("IO error while running `{command}`: {source}")]
    IoError {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// Classify a spawn failure, mapping a missing executable to `CommandNotFound`
    pub fn spawn(command: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return ProcessError::CommandNotFound(command.into());
        }
        ProcessError::IoError {
            command: command.into(),
            source,
        }
    }
}
