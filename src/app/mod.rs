//! Application module
//!
//! Application-level functionality used by the binary:
//! - Configuration handling
//! - Logging setup

pub mod config;
pub mod logging;

pub use config::AppConfig;
pub use logging::init_logging;
