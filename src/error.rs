//! CLI Error Types

use derive_more::{Display, Error};

/// A fatal CLI error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for the CLI.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that stop the run before or between its phases. Failures of
/// individual jobs are reported and never end up here.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not list files")]
    Walk,
    #[display("metadata tool unavailable")]
    Metadata,
    #[display("terminal error")]
    Terminal,
    #[display("could not start the runtime")]
    Runtime,
}
