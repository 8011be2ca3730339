//! # Loanshell Common
//!
//! Shared pieces for the Loanshell crates: logging configuration and setup.

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Errors raised while setting up shared infrastructure.
#[derive(Error, Debug)]
pub enum CommonError {
    /// The log filter directive could not be parsed.
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    /// A global subscriber was already installed.
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),

    /// Unknown log format name.
    #[error("Unknown log format: {0}")]
    UnknownFormat(String),
}
