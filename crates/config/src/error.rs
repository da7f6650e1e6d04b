//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested configuration file doesn't exist.
    #[display("config file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The configuration couldn't be read or doesn't have the expected shape.
    #[display("could not load configuration")]
    Load,
    #[display("unknown command '{_0}'")]
    UnknownCommand(#[error(not(source))] String),
    #[display("unknown task '{_0}'")]
    UnknownTask(#[error(not(source))] String),
    /// A command or task is defined but can't be used.
    #[display("invalid definition '{_0}'")]
    Invalid(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
