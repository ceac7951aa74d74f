//! Error taxonomy shared by every component of the crate.
//!
//! Calculations can fail at a handful of well separated points, and each one
//! maps onto a dedicated variant of [`QCError`]:
//!
//! 1. **Configuration**: an invalid enumerated option or an incompatible
//!    multi-molecule request, raised before any process is launched.
//! 2. **Missing artifact**: the engine log is absent after a run.
//! 3. **Abnormal termination**: the log exists but lacks the success marker.
//! 4. **Parse inconsistency**: parsed values contradict each other.
//! 5. **Parse**: a line inside a recognised section could not be read.
//!
//! Advisory conditions (imaginary modes, numerical frequency downgrade,
//! missing tautomers) are never errors; they are logged with `warn!` and
//! recorded on the molecule flags.

use crate::settings::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for every fallible operation in the crate.
#[derive(Error, Debug)]
pub enum QCError {
    /// File system or I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid option value or incompatible calculation request
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// The engine log expected after a run does not exist
    #[error("Missing output file: {}", .0.display())]
    MissingArtifact(PathBuf),
    /// The engine log lacks the success marker
    #[error("{engine} did not terminate normally (log: {})", .log.display())]
    AbnormalTermination {
        /// Engine that produced the log
        engine: String,
        /// Path of the inspected log
        log: PathBuf,
    },
    /// Parsed values contradict each other
    #[error("Parse inconsistency: {0}")]
    ParseInconsistency(String),
    /// A section of the log could not be read
    #[error("Parse error: {0}")]
    Parse(String),
    /// The engine executable could not be located or spawned
    #[error("Executable error: {0}")]
    Executable(String),
    /// The engine process exceeded the configured wall time
    #[error("{engine} exceeded the timeout of {seconds} s")]
    Timeout {
        /// Engine that was killed
        engine: String,
        /// Configured limit in seconds
        seconds: u64,
    },
    /// Settings could not be loaded
    #[error("Settings error: {0}")]
    Settings(#[from] ConfigError),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, QCError>;

impl QCError {
    /// Builds a configuration error from anything printable.
    pub fn config(msg: impl Into<String>) -> Self {
        QCError::Configuration(msg.into())
    }

    /// Builds a parse error from anything printable.
    pub fn parse(msg: impl Into<String>) -> Self {
        QCError::Parse(msg.into())
    }

    /// Returns true for errors raised before any engine process was started.
    pub fn is_configuration(&self) -> bool {
        matches!(self, QCError::Configuration(_))
    }
}
