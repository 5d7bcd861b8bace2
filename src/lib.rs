//! # procrelay
//!
//! Runs a child process and relays every line it writes to stdout or stderr
//! to registered sinks, in order, with a bounded shutdown.
//!
//! ## Usage
//!
//! ```bash
//! procrelay run --name geth --log-dir logs -- geth --dev
//! ```
//!
//! ## Modules
//!
//! - `app` - Application-level configuration and logging setup
//! - `subprocess` - Process lifecycle abstraction and output interception
//! - `subprocess::intercept` - Relay queues, producers, consumers, sinks and the pipeline controller
pub mod app;
pub mod subprocess;

pub use subprocess::intercept::{
    InterceptConfig, InterceptError, LineSink, LoggingSink, Pipeline, StopReport, StreamSource,
};
pub use subprocess::{ChildProcess, ProcessLifecycle};
