//! Pipeline execution with real side effects.
//!
//! [`execute`] runs a [`Task`] against one [`Job`]:
//!
//! 1. **Resolve** the destination with [`resolve`](crate::resolve). An empty
//!    chain is skipped; a chain of renames only moves the source.
//! 2. **Stage** a private copy of the source when the first side effect would
//!    otherwise modify it (an in-place command or a metadata write).
//! 3. **Run** every step in order. Each shell step that isn't in place writes
//!    to a fresh temporary which becomes the new working file.
//! 4. **Commit** the working file to the destination, under the batch-wide
//!    [`FsGuard`], without ever replacing an existing file (the only
//!    exception is a job rewriting its own single source). Sources are then
//!    deleted unless the task keeps them.
//!
//! Working files are deleted on every exit path: they're [`TempPath`]s
//! dropped along with the run. A failed job leaves its sources untouched and
//! no destination behind.
//!
//! [`TempPath`]: tempfile::TempPath

mod guard;
mod shell;
mod working;

pub use self::guard::{Claims, FsGuard};
pub use self::shell::{ProcessRunner, RunnerHandle, ShellRunner, quote};
pub(crate) use self::guard::occupied;
use self::shell::quote_path;
use self::working::{WorkingFile, extension_of, reserve};
use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::format::substitute;
use crate::model::{CommandStep, Job, Shell, StepAction, StepKind, Task};
use crate::resolve::{Disposition, Resolution, resolve};
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// The outcome of (successfully) executing a single job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// The task has no steps; nothing was done.
    Skipped,
    /// The file is already where the task would put it.
    AlreadyCorrect(PathBuf),
    /// The source was moved (or, when keeping sources, copied) by renames alone.
    Renamed(PathBuf),
    /// The pipeline ran and its result was placed at `destination`.
    Processed { destination: PathBuf, extension: Option<String> },
}

/// Executes `task` for `job`.
///
/// # Errors
/// - [`ErrorKind::DestinationConflict`] when the destination exists or was
///   claimed by another job; nothing is touched.
/// - [`ErrorKind::KeepConflict`] when a `keep` task would overwrite a source.
/// - [`ErrorKind::Cancelled`] when `cancel` was raised before the commit.
/// - Any step failure ([`ErrorKind::Template`],
///   [`ErrorKind::CommandTemplate`], [`ErrorKind::ExternalProcess`],
///   [`ErrorKind::Metadata`], [`ErrorKind::Io`]).
#[instrument(skip_all, fields(source = %job.sources.first().map(|p| p.display().to_string()).unwrap_or_default()))]
pub fn execute(ctx: &Context, task: &Task, job: &Job, guard: &FsGuard, cancel: &AtomicBool) -> Result<Action> {
    check_cancelled(cancel)?;
    let resolution = resolve(&task.steps, job.filename()?, job.metadata.as_ref())?;
    let destination = PathBuf::from(&resolution.destination);
    match resolution.disposition() {
        Disposition::Skip => return Ok(Action::Skipped),
        Disposition::RenameOnly => return rename_only(task, job, destination, guard),
        Disposition::SideEffects => (),
    }
    if task.keep && job.sources.contains(&destination) {
        exn::bail!(ErrorKind::KeepConflict(destination));
    }

    let mut run = Run::stage(ctx, task, job)?;
    for step in &task.steps {
        check_cancelled(cancel)?;
        run.step(step)?;
    }
    check_cancelled(cancel)?;
    run.commit(guard)
}

/// Runs `task` for `job` and returns the final working file's contents and
/// output extension instead of committing it anywhere.
///
/// Sources are never modified or deleted.
#[instrument(skip_all)]
pub fn content(ctx: &Context, task: &Task, job: &Job, cancel: &AtomicBool) -> Result<(Vec<u8>, Option<String>)> {
    let mut run = Run::stage(ctx, task, job)?;
    for step in &task.steps {
        check_cancelled(cancel)?;
        run.step(step)?;
    }
    let contents = fs::read(run.working.path()).or_raise(|| ErrorKind::Io)?;
    Ok((contents, run.trace.extension))
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        exn::bail!(ErrorKind::Cancelled);
    }
    Ok(())
}

fn rename_only(task: &Task, job: &Job, destination: PathBuf, guard: &FsGuard) -> Result<Action> {
    let source = job.primary()?;
    if source == destination {
        return Ok(Action::AlreadyCorrect(destination));
    }
    let mut claims = guard.lock();
    claims.claim(&destination, &job.sources)?;
    if occupied(&destination) {
        exn::bail!(ErrorKind::DestinationConflict(destination));
    }
    create_parent(&destination)?;
    if task.keep {
        fs::copy(source, &destination).or_raise(|| ErrorKind::Io)?;
    } else {
        WorkingFile::Original(source.to_path_buf()).place(&destination, false)?;
    }
    tracing::info!(destination = %destination.display(), "Renamed");
    Ok(Action::Renamed(destination))
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).or_raise(|| ErrorKind::Io),
        None => Ok(()),
    }
}

/// The state of one job while its steps run. Owned by a single worker.
struct Run<'a> {
    ctx: &'a Context,
    task: &'a Task,
    job: &'a Job,
    working: WorkingFile,
    /// Destination and output extension so far, threaded exactly as the
    /// resolver does.
    trace: Resolution,
    /// Whether a merge step already consumed every source.
    merged: bool,
}

impl<'a> Run<'a> {
    fn stage(ctx: &'a Context, task: &'a Task, job: &'a Job) -> Result<Self> {
        let source = job.primary()?;
        let first_effect = task.steps.iter().find(|step| step.kind() != StepKind::Rename);
        let needs_copy = match first_effect.map(|step| &step.action) {
            Some(StepAction::Shell(shell)) => shell.in_place,
            Some(StepAction::MetadataWrite(_)) => true,
            Some(StepAction::Rename(_)) | None => false,
        };
        let working = if needs_copy {
            WorkingFile::stage(source, ctx.temp_dir.as_deref())?
        } else {
            WorkingFile::Original(source.to_path_buf())
        };
        Ok(Self { ctx, task, job, working, trace: Resolution::new(job.filename()?), merged: false })
    }

    fn step(&mut self, step: &CommandStep) -> Result<()> {
        let metadata = self.job.metadata.as_ref();
        let value = self.trace.apply(step, metadata)?;
        match &step.action {
            StepAction::Rename(_) => Ok(()),
            StepAction::Shell(shell) => self.shell(step, shell),
            StepAction::MetadataWrite(write) => {
                let value = value.unwrap_or_default();
                let writer = self.ctx.writer.as_ref().ok_or_raise(|| ErrorKind::Metadata)?;
                tracing::info!(step = step.label(), tag = %write.tag, %value, "Writing metadata");
                writer.write_tag(self.working.path(), &write.tag, &value).or_raise(|| ErrorKind::Metadata)
            },
        }
    }

    fn shell(&mut self, step: &CommandStep, shell: &Shell) -> Result<()> {
        let mut params: HashMap<String, String> = HashMap::new();
        if let Some(metadata) = &self.job.metadata {
            params.extend(metadata.iter().map(|(tag, value)| (tag.clone(), quote(&value.to_string()))));
        }
        let input = if self.task.merge && !self.merged {
            self.merged = true;
            self.job.sources.iter().map(|source| quote_path(source)).collect::<Vec<_>>().join(" ")
        } else {
            quote_path(self.working.path())
        };
        params.insert("in".to_string(), input);

        let output = if shell.in_place {
            None
        } else {
            let extension = self.trace.extension.clone().or_else(|| extension_of(self.working.path()));
            Some(reserve(self.ctx.temp_dir.as_deref(), extension.as_deref())?)
        };
        if let Some(output) = &output {
            params.insert("out".to_string(), quote_path(output));
        }

        let command = substitute(&shell.command, |key| params.get(key).cloned())
            .or_raise(|| ErrorKind::CommandTemplate { step: step.label().to_string() })?;
        tracing::info!(step = step.label(), %command, "Running command");
        self.ctx.runner.run(&command)?;

        if let Some(output) = output {
            // Drops, and so deletes, the previous temporary.
            self.working = WorkingFile::Temporary(output);
        }
        Ok(())
    }

    fn commit(self, guard: &FsGuard) -> Result<Action> {
        let trace = self.trace.finish();
        let destination = PathBuf::from(trace.destination);
        let extension = trace.extension;
        if self.working.path() == destination {
            return Ok(Action::AlreadyCorrect(destination));
        }
        let sources = &self.job.sources;
        // Rewriting a lone source is the only time an existing file goes.
        let replaces_source = !self.task.keep && sources.len() == 1 && sources[0] == destination;

        let mut claims = guard.lock();
        claims.claim(&destination, sources)?;
        if occupied(&destination) && !replaces_source {
            exn::bail!(ErrorKind::DestinationConflict(destination));
        }
        create_parent(&destination)?;
        self.working.place(&destination, replaces_source)?;
        if !self.task.keep {
            for source in sources.iter().filter(|source| **source != destination) {
                match fs::remove_file(source) {
                    Ok(()) => (),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => (),
                    Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
                }
            }
        }
        drop(claims);

        tracing::info!(destination = %destination.display(), "Processed");
        Ok(Action::Processed { destination, extension })
    }
}
