pub mod builder;
pub mod error;
pub mod intercept;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::{MockOutput, MockProcess};
pub use runner::ProcessCommand;
pub use runner::{BoxedReader, ChildProcess, ExitStatus, ProcessLifecycle};
