//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and appropriate exit codes.

use std::fmt;
use std::process;

use tilesched::{ConfigFileError, FetchError, SchedulerError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid command-line arguments
    Args(String),
    /// Failed to load the configuration file
    Config(ConfigFileError),
    /// Scheduler rejected an operation
    Scheduler(SchedulerError),
    /// Failed to set up an HTTP client
    Http(FetchError),
    /// Failed to start the async runtime or a task failed
    Runtime(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::Config(ConfigFileError::InvalidValue { .. }) = self {
            eprintln!();
            eprintln!("Check the config file with: tilesched config show");
            eprintln!("Concurrency values must be positive integers.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Args(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Scheduler(e) => write!(f, "Scheduler error: {}", e),
            CliError::Http(e) => write!(f, "HTTP client error: {}", e),
            CliError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Scheduler(e) => Some(e),
            CliError::Http(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<SchedulerError> for CliError {
    fn from(e: SchedulerError) -> Self {
        CliError::Scheduler(e)
    }
}
