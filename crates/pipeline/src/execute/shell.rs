use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::instrument;

/// Runs one command line of a shell step to completion.
pub trait ProcessRunner {
    /// Fails with [`ErrorKind::ExternalProcess`] when the command exits
    /// unsuccessfully.
    fn run(&self, command: &str) -> Result<()>;
}

pub type RunnerHandle = Arc<dyn ProcessRunner + Send + Sync>;

/// Runs command lines through `<shell> -c`, capturing their output.
#[derive(Clone, Debug)]
pub struct ShellRunner {
    shell: PathBuf,
}
impl ShellRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self { shell: shell.into() }
    }
}
impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("sh")
    }
}

impl ProcessRunner for ShellRunner {
    #[instrument(skip(self), fields(shell = %self.shell.display()))]
    fn run(&self, command: &str) -> Result<()> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .or_raise(|| ErrorKind::Io)?;
        if !output.stderr.is_empty() {
            tracing::debug!(stderr = %String::from_utf8_lossy(&output.stderr).trim_end(), "Command wrote to stderr");
        }
        if !output.status.success() {
            exn::bail!(ErrorKind::ExternalProcess { command: command.to_string(), status: output.status.to_string() });
        }
        Ok(())
    }
}

/// Quotes `s` as a single POSIX shell word.
///
/// ```
/// use metatask_pipeline::execute::quote;
///
/// assert_eq!(quote("it's"), r#"'it'"'"'s'"#);
/// ```
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}

pub(crate) fn quote_path(path: &Path) -> String {
    quote(&path.to_string_lossy())
}
