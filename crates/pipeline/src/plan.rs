//! Preview of a batch before anything runs.
//!
//! The [`Planner`] resolves each job and sorts it into "nothing to do",
//! "ready" or "conflicting". Ready jobs claim their destination in the
//! planner's [`FsGuard`]; hand the same guard to
//! [`Batch::with_guard`](crate::Batch::with_guard) so that the claims carry
//! over to execution.

use crate::error::Result;
use crate::execute::{FsGuard, occupied};
use crate::model::{Job, Task};
use crate::resolve::{Disposition, Resolution, resolve};
use derive_more::Display;
use std::path::PathBuf;
use std::sync::Arc;

/// Why a job can't run.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ConflictReason {
    #[display("Destination already exists")]
    Exists,
    #[display("Destination will already exist")]
    Claimed,
    #[display("Source equals destination in keep mode")]
    KeepSource,
}

/// What would happen to one job.
#[derive(Debug)]
pub enum Plan {
    /// No steps apply, or only renames that don't change the name.
    Skip(Job),
    Ready { job: Job, resolution: Resolution },
    Conflict { job: Job, resolution: Resolution, reason: ConflictReason },
}

pub struct Planner<'a> {
    task: &'a Task,
    guard: Arc<FsGuard>,
}
impl<'a> Planner<'a> {
    pub fn new(task: &'a Task) -> Self {
        Self { task, guard: Arc::new(FsGuard::new()) }
    }

    /// The claims made so far.
    pub fn guard(&self) -> Arc<FsGuard> {
        Arc::clone(&self.guard)
    }

    /// Resolves `job` and, when it can run, claims its destination.
    ///
    /// Fails only when resolution itself fails, e.g. a missing template key.
    pub fn plan(&self, job: Job) -> Result<Plan> {
        let resolution = resolve(&self.task.steps, job.filename()?, job.metadata.as_ref())?;
        let destination = PathBuf::from(&resolution.destination);
        let unchanged = job.primary()? == destination;
        match resolution.disposition() {
            Disposition::Skip => return Ok(Plan::Skip(job)),
            Disposition::RenameOnly if unchanged => return Ok(Plan::Skip(job)),
            Disposition::RenameOnly | Disposition::SideEffects => (),
        }

        let sources = &job.sources;
        let renames_only = resolution.disposition() == Disposition::RenameOnly;
        let replaces_source = !renames_only && !self.task.keep && sources.len() == 1 && unchanged;
        let mut claims = self.guard.lock();
        let reason = if self.task.keep && sources.contains(&destination) {
            Some(ConflictReason::KeepSource)
        } else if claims.owner(&destination).is_some_and(|owner| owner != sources.as_slice()) {
            Some(ConflictReason::Claimed)
        } else if occupied(&destination) && !replaces_source {
            Some(ConflictReason::Exists)
        } else {
            claims.claim(&destination, sources)?;
            None
        };
        drop(claims);

        Ok(match reason {
            Some(reason) => Plan::Conflict { job, resolution, reason },
            None => Plan::Ready { job, resolution },
        })
    }
}
