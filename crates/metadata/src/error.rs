//! Metadata Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A metadata error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("exiftool not detected on your system")]
    ToolNotFound,
    /// The metadata tool exited with a non-zero status while reading a file.
    /// Callers usually skip the file.
    #[display("error on getting metadata on '{}'", _0.display())]
    Extraction(#[error(not(source))] PathBuf),
    /// The metadata tool exited with a non-zero status while writing a tag.
    #[display("error on writing metadata to '{}'", _0.display())]
    Write(#[error(not(source))] PathBuf),
    /// The metadata tool produced output that isn't a JSON list of objects.
    #[display("unexpected metadata tool output")]
    Parse,
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io)
    }
}
