//! Pipeline Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Lower-level failures (regex, upon,
//! I/O, the metadata tool) are kept as children in the error tree.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies the origin of a pipeline failure.
///
/// ### Configuration Errors
/// - [`ErrorKind::Invalid`]: fatal before any job runs.
///
/// ### Per-Job Errors
/// - [`ErrorKind::Template`], [`ErrorKind::CommandTemplate`]
/// - [`ErrorKind::ExternalProcess`], [`ErrorKind::Metadata`]
/// - [`ErrorKind::KeepConflict`], [`ErrorKind::Cancelled`]
/// - [`ErrorKind::Io`], [`ErrorKind::Worker`]
///
/// ### Skips
/// - [`ErrorKind::DestinationConflict`]: the job is reported but nothing was
///   touched; the rest of the batch carries on.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A command descriptor failed validation.
    #[display("invalid command '{_0}'")]
    Invalid(#[error(not(source))] String),
    /// A template or pattern failed to render or compile for this file.
    #[display("template error")]
    Template,
    /// A shell command template referenced a parameter that doesn't exist.
    #[display("error in command '{step}'")]
    CommandTemplate { step: String },
    /// An external command exited unsuccessfully.
    #[display("command failed with {status}: {command}")]
    ExternalProcess { command: String, status: String },
    /// The destination already exists, or another job in the batch owns it.
    #[display("destination already exists: {}", _0.display())]
    DestinationConflict(#[error(not(source))] PathBuf),
    /// A `keep` job would have to overwrite its own source.
    #[display("source equals destination in keep mode: {}", _0.display())]
    KeepConflict(#[error(not(source))] PathBuf),
    /// The batch was cancelled before this job committed.
    #[display("cancelled")]
    Cancelled,
    /// Writing a metadata tag failed.
    #[display("metadata tool failed")]
    Metadata,
    #[display("I/O error")]
    Io,
    /// The worker running the job panicked or was aborted.
    #[display("worker failed")]
    Worker,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Worker)
    }

    /// Returns `true` for outcomes that skip a job rather than fail it.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::DestinationConflict(_) | Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::ExternalProcess { command: "false".into(), status: "exit status: 1".into() }.to_string(),
            "command failed with exit status: 1: false"
        );
        assert_eq!(
            ErrorKind::DestinationConflict(PathBuf::from("a/b.png")).to_string(),
            "destination already exists: a/b.png"
        );
        assert_eq!(ErrorKind::CommandTemplate { step: "resize".into() }.to_string(), "error in command 'resize'");
    }

    #[test]
    fn error_kind_classification() {
        assert!(ErrorKind::DestinationConflict(PathBuf::new()).is_skip());
        assert!(ErrorKind::Cancelled.is_skip());
        assert!(!ErrorKind::Template.is_skip());
        assert!(ErrorKind::Io.is_retryable());
        assert!(!ErrorKind::Template.is_retryable());
    }
}
