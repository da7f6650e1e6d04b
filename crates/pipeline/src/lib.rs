//! Destination resolution and execution of file transformation pipelines.
//!
//! A [`Task`] is a linear chain of [`CommandStep`]s (regex renames, shell
//! commands, metadata tag writes). For every [`Job`] (one source file, or
//! several collapsing into one when merging):
//!
//! - [`resolve`] computes, without touching the filesystem, where the file
//!   would end up and which kinds of work the chain would do;
//! - [`execute`] applies the chain for real, threading a working file through
//!   temporary outputs and committing it to the destination without ever
//!   overwriting an existing file;
//! - [`Batch`] runs many jobs concurrently while guaranteeing that no two of
//!   them claim the same destination.
//!
//! [`diff`], [`walk`] and [`plan`] support the preview a caller shows before
//! asking for confirmation.

pub mod batch;
pub mod diff;
pub mod error;
pub mod execute;
pub mod format;
pub mod model;
pub mod plan;
pub mod resolve;
pub mod walk;

pub use crate::batch::{Batch, BatchEvent, JobReport};
pub use crate::execute::{Action, FsGuard, ProcessRunner, RunnerHandle, ShellRunner, content, execute};
pub use crate::model::{CommandStep, Job, StepKind, Task};
pub use crate::resolve::{Disposition, Resolution, resolve};
use metatask_metadata::WriterHandle;
use std::path::PathBuf;
use std::sync::Arc;

/// How many jobs a [`Batch`] runs at once unless told otherwise.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Collaborators shared by every job of a run.
///
/// Cheap to clone: the runner and writer are reference counted.
#[derive(Clone)]
pub struct Context {
    /// Runs the command lines of shell steps.
    pub runner: RunnerHandle,
    /// Writes tags for metadata steps. A task with a metadata step fails
    /// without one.
    pub writer: Option<WriterHandle>,
    /// Where temporary working files are created; the system default when
    /// `None`.
    pub temp_dir: Option<PathBuf>,
}
impl Context {
    pub fn new(runner: RunnerHandle) -> Self {
        Self { runner, writer: None, temp_dir: None }
    }

    pub fn with_writer(mut self, writer: WriterHandle) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(temp_dir.into());
        self
    }
}
impl Default for Context {
    fn default() -> Self {
        Self::new(Arc::new(ShellRunner::default()))
    }
}
