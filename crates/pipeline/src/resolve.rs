//! Side-effect free destination resolution.
//!
//! [`resolve`] walks a step chain the same way the executor does, but only
//! threads the filename and output extension through it. Callers use the
//! result to preview a job and to decide whether it needs confirmation.

use crate::error::Result;
use crate::model::{CommandStep, StepAction, StepKind};
use metatask_metadata::Metadata;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::instrument;

/// A short trailing extension: a dot followed by 1 to 5 alphanumerics.
static EXTENSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.[A-Za-z0-9]{1,5}$").unwrap());

/// What a step chain would do to one filename.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub destination: String,
    /// Extension of the last shell step that declared one.
    pub extension: Option<String>,
    /// Distinct kinds of the steps in the chain.
    pub kinds: BTreeSet<StepKind>,
    /// Human-readable notes for steps that don't show in the destination,
    /// e.g. `Title = holiday` for a metadata write.
    pub messages: Vec<String>,
}

/// How a caller should treat a resolved job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// The chain is empty; nothing to do.
    Skip,
    /// Only renames: apply without asking.
    RenameOnly,
    /// Shell commands or metadata writes: preview and confirm first.
    SideEffects,
}

impl Resolution {
    pub(crate) fn new(filename: &str) -> Self {
        Self { destination: filename.to_string(), ..Self::default() }
    }

    pub fn disposition(&self) -> Disposition {
        if self.kinds.is_empty() {
            Disposition::Skip
        } else if self.kinds.iter().all(|kind| *kind == StepKind::Rename) {
            Disposition::RenameOnly
        } else {
            Disposition::SideEffects
        }
    }

    /// Advances through one step. Shared with the executor so that both agree
    /// on every intermediate destination.
    ///
    /// Returns the computed value of a metadata write.
    pub(crate) fn apply(&mut self, step: &CommandStep, metadata: Option<&Metadata>) -> Result<Option<String>> {
        self.kinds.insert(step.kind());
        match &step.action {
            StepAction::Rename(rename) => {
                self.destination = rename.apply(&self.destination, metadata)?;
                Ok(None)
            },
            StepAction::Shell(shell) => {
                if let Some(extension) = &shell.output_extension {
                    self.extension = Some(extension.clone());
                }
                Ok(None)
            },
            StepAction::MetadataWrite(write) => {
                let value = write.value(&self.destination, metadata)?;
                self.messages.push(format!("{} = {value}", write.tag));
                Ok(Some(value))
            },
        }
    }

    /// Applies the declared output extension, if any, to the destination.
    pub(crate) fn finish(mut self) -> Self {
        if let Some(extension) = &self.extension {
            self.destination = normalize_extension(&self.destination, extension);
        }
        self
    }
}

/// Computes the destination of `filename` after `steps`, without touching
/// the filesystem or running anything.
///
/// Calling it twice with the same inputs gives the same answer.
#[instrument(level = "trace", skip(steps, metadata))]
pub fn resolve(steps: &[CommandStep], filename: &str, metadata: Option<&Metadata>) -> Result<Resolution> {
    let mut resolution = Resolution::new(filename);
    for step in steps {
        resolution.apply(step, metadata)?;
    }
    Ok(resolution.finish())
}

/// Replaces the trailing short extension of `filename` with `extension`, or
/// appends it when there is none.
///
/// ```
/// use metatask_pipeline::resolve::normalize_extension;
///
/// assert_eq!(normalize_extension("a.b.JPG", "png"), "a.b.png");
/// assert_eq!(normalize_extension("noext", "png"), "noext.png");
/// ```
pub fn normalize_extension(filename: &str, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    match EXTENSION.find(filename) {
        Some(found) => format!("{}.{extension}", &filename[..found.start()]),
        None => format!("{filename}.{extension}"),
    }
}
