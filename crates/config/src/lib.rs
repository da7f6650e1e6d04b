//! Configuration loading and the command registry.
//!
//! A configuration file (YAML, TOML or JSON, chosen by extension) defines
//! named commands under `cmds` and named tasks under `tasks`, plus a few
//! runtime settings. Any top-level setting can be overridden from the
//! environment with a `METATASK_` prefix, e.g. `METATASK_NB_PROCESS=4`.
//!
//! ```yaml
//! cmds:
//!   lower: { type: rename, format: lower }
//!   png: optipng {in}
//!   webp: { cmd: "cwebp {in} -o {out}", out_ext: webp }
//! tasks:
//!   web:
//!     cmds: [lower, webp]
//! ignore_dir: ['\.git$']
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use metatask_pipeline::model::{RawStep, StepDef};
use metatask_pipeline::{CommandStep, DEFAULT_CONCURRENCY, Task};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::instrument;

const ENV_PREFIX: &str = "METATASK_";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Named command definitions.
    pub cmds: BTreeMap<String, StepDef>,
    /// Named tasks, each a list of commands.
    pub tasks: BTreeMap<String, TaskDef>,
    /// Directory patterns skipped while walking.
    pub ignore_dir: Vec<String>,
    /// How many jobs run at once.
    pub nb_process: usize,
    /// The `exiftool` binary; looked up on `PATH` when unset.
    pub metadata_tool: Option<PathBuf>,
    /// The shell that runs command lines.
    pub shell: PathBuf,
    /// Where temporary working files are created; the system default when
    /// unset.
    pub temp_dir: Option<PathBuf>,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            cmds: BTreeMap::new(),
            tasks: BTreeMap::new(),
            ignore_dir: vec![],
            nb_process: DEFAULT_CONCURRENCY,
            metadata_tool: None,
            shell: PathBuf::from("sh"),
            temp_dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TaskDef {
    pub cmds: Vec<StepRef>,
    pub merge: bool,
    pub keep: bool,
}

/// A task's step: the name of a configured command, or an inline definition.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StepRef {
    Name(String),
    Inline(RawStep),
}

impl Config {
    /// `<config dir>/metatask/config.yaml`, when the platform has a config
    /// directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "metatask").map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Loads `path`, or the default file when `None`.
    ///
    /// A missing default file is not an error: the defaults apply. A missing
    /// explicit file is.
    #[instrument(level = "debug")]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let figment = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => with_file(Figment::new(), path),
            None => match Self::default_path() {
                Some(default) if default.is_file() => with_file(Figment::new(), &default),
                _ => {
                    tracing::debug!("No configuration file, using defaults");
                    Figment::new()
                },
            },
        };
        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extracts a configuration from any set of providers.
    pub fn extract(figment: Figment) -> Result<Self> {
        figment.extract().or_raise(|| ErrorKind::Load)
    }
}

fn with_file(figment: Figment, path: &Path) -> Figment {
    tracing::debug!(path = %path.display(), "Loading configuration");
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => figment.merge(Toml::file(path)),
        Some("json") => figment.merge(Json::file(path)),
        _ => figment.merge(Yaml::file(path)),
    }
}

/// Validated commands and tasks, looked up by name.
#[derive(Debug)]
pub struct Registry {
    cmds: BTreeMap<String, CommandStep>,
    tasks: BTreeMap<String, TaskDef>,
}
impl Registry {
    /// Validates every configured command, so that a typo fails before any
    /// file is touched.
    pub fn new(config: &Config) -> Result<Self> {
        let cmds = config
            .cmds
            .iter()
            .map(|(name, def)| {
                let step = CommandStep::from_def(Some(name), def.clone());
                Ok((name.clone(), step.or_raise(|| ErrorKind::Invalid(name.clone()))?))
            })
            .collect::<Result<_>>()?;
        Ok(Self { cmds, tasks: config.tasks.clone() })
    }

    pub fn lookup(&self, name: &str) -> Result<CommandStep> {
        self.cmds.get(name).cloned().ok_or_raise(|| ErrorKind::UnknownCommand(name.to_string()))
    }

    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.cmds.keys().map(String::as_str)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    /// Builds a configured task. `merge` and `keep` can only turn the
    /// task's own flags on.
    pub fn named_task(&self, name: &str, merge: bool, keep: bool) -> Result<Task> {
        let def = self.tasks.get(name).ok_or_raise(|| ErrorKind::UnknownTask(name.to_string()))?;
        let steps = def
            .cmds
            .iter()
            .map(|step| match step {
                StepRef::Name(command) => self.lookup(command),
                StepRef::Inline(raw) => CommandStep::from_def(None, StepDef::Step(raw.clone()))
                    .or_raise(|| ErrorKind::Invalid(name.to_string())),
            })
            .collect::<Result<Vec<_>>>()?;
        let task = Task::new(steps).with_merge(def.merge || merge).with_keep(def.keep || keep);
        task.validate().or_raise(|| ErrorKind::Invalid(name.to_string()))?;
        Ok(task)
    }

    /// Resolves what the user asked for on the command line.
    ///
    /// A single name that matches a configured task selects that task.
    /// Otherwise every name must be a command, and they run in the order
    /// given. No names at all gives an empty task, which skips every file.
    #[instrument(level = "debug", skip(self))]
    pub fn task<S: AsRef<str> + std::fmt::Debug>(&self, names: &[S], merge: bool, keep: bool) -> Result<Task> {
        if let [name] = names
            && self.tasks.contains_key(name.as_ref())
        {
            return self.named_task(name.as_ref(), merge, keep);
        }
        let steps = names.iter().map(|name| self.lookup(name.as_ref())).collect::<Result<Vec<_>>>()?;
        let task = Task::new(steps).with_merge(merge).with_keep(keep);
        let label = names.iter().map(|name| name.as_ref()).collect::<Vec<_>>().join(",");
        task.validate().or_raise(|| ErrorKind::Invalid(label))?;
        Ok(task)
    }
}
