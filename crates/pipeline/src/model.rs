//! Command descriptors: the data shapes of pipeline steps, tasks and jobs.
//!
//! Steps are deserialized from configuration through [`StepDef`], which
//! accepts either a bare shell command string or a map with an optional
//! `type` key (`rename`, `cmd` or `metadata`; missing means `cmd`). The raw
//! shape is validated into the closed [`StepAction`] enum so that the
//! resolver and executor can match exhaustively.

use crate::error::{ErrorKind, Result};
use crate::format::{Dialect, render};
use exn::{OptionExt, ResultExt};
use metatask_metadata::{Metadata, Value as MetadataValue};
use regex::{Captures, Regex};
use serde::Deserialize;
use std::borrow::Cow;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

/// The kind of a step, as reported by the resolver.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Rename,
    Cmd,
    Metadata,
}
impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Cmd => "cmd",
            Self::Metadata => "metadata",
        }
    }
}
impl Display for StepKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Case transform applied to the matched text of a rename.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CaseMode {
    Upper,
    Lower,
}

/// What a rename puts in place of the first match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Replacement {
    /// A regex replacement string (`$1`, `${name}`), optionally rendered
    /// against the file's metadata first.
    Template(String),
    /// The matched text itself, upper- or lower-cased.
    Case(CaseMode),
}

/// A regex substitution on the destination path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rename {
    pub pattern: String,
    pub replacement: Replacement,
    /// Render the replacement template against the metadata. The pattern is
    /// always a plain regex.
    pub metadata: bool,
    pub dialect: Dialect,
    /// When non-empty, these substitutions run in order instead of this one.
    pub steps: Vec<Rename>,
}
impl Rename {
    pub fn new(pattern: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: Replacement::Template(template.into()),
            metadata: false,
            dialect: Dialect::default(),
            steps: vec![],
        }
    }

    pub fn case(pattern: impl Into<String>, case: CaseMode) -> Self {
        Self { replacement: Replacement::Case(case), ..Self::new(pattern, "") }
    }

    /// A rename made of several substitutions applied in sequence.
    pub fn chain(steps: impl IntoIterator<Item = Rename>) -> Self {
        Self { steps: steps.into_iter().collect(), ..Self::new(".*", "") }
    }

    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    fn uses_metadata(&self) -> bool {
        self.metadata || self.steps.iter().any(Rename::uses_metadata)
    }

    /// Applies this rename to `filename`, replacing the first match only.
    ///
    /// Templates are rendered against `metadata` only when the rename asks
    /// for it and metadata is present; otherwise they're used verbatim.
    pub fn apply(&self, filename: &str, metadata: Option<&Metadata>) -> Result<String> {
        if !self.steps.is_empty() {
            return self.steps.iter().try_fold(filename.to_string(), |name, step| step.apply(&name, metadata));
        }
        let metadata = metadata.filter(|_| self.metadata);
        let regex = compile(&self.pattern)?;
        let renamed = match &self.replacement {
            Replacement::Template(template) => {
                let template = prepare(template, metadata, self.dialect)?;
                regex.replacen(filename, 1, &*template).into_owned()
            },
            Replacement::Case(CaseMode::Upper) => {
                regex.replacen(filename, 1, |caps: &Captures<'_>| caps[0].to_uppercase()).into_owned()
            },
            Replacement::Case(CaseMode::Lower) => {
                regex.replacen(filename, 1, |caps: &Captures<'_>| caps[0].to_lowercase()).into_owned()
            },
        };
        Ok(renamed)
    }
}

/// An external command run through the shell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shell {
    /// Command line with `{in}`, `{out}` and metadata-key placeholders.
    pub command: String,
    /// The command modifies `{in}` itself and has no `{out}`.
    pub in_place: bool,
    pub output_extension: Option<String>,
}
impl Shell {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), in_place: false, output_extension: None }
    }

    pub fn in_place(mut self) -> Self {
        self.in_place = true;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.output_extension = Some(extension.into().trim_start_matches('.').to_string());
        self
    }
}

/// Writes a tag whose value is derived from the destination filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataWrite {
    pub tag: String,
    /// Regex matched against the current filename, never rendered.
    pub pattern: String,
    /// Expanded with the pattern's captures (`$1`, `${name}`).
    pub value: String,
    pub metadata: bool,
    pub dialect: Dialect,
}
impl MetadataWrite {
    pub fn new(tag: impl Into<String>, pattern: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            pattern: pattern.into(),
            value: value.into(),
            metadata: false,
            dialect: Dialect::default(),
        }
    }

    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    /// Computes the tag value from `filename`. Fails when the pattern
    /// doesn't match.
    pub fn value(&self, filename: &str, metadata: Option<&Metadata>) -> Result<String> {
        let metadata = metadata.filter(|_| self.metadata);
        let regex = compile(&self.pattern)?;
        let template = prepare(&self.value, metadata, self.dialect)?;
        let captures = regex.captures(filename).ok_or_raise(|| ErrorKind::Template)?;
        let mut value = String::new();
        captures.expand(&template, &mut value);
        Ok(value)
    }
}

/// Renders a replacement template against the metadata. The result is
/// expanded with regex captures afterwards, so `$` in metadata text is
/// escaped to stay literal.
fn prepare<'a>(template: &'a str, metadata: Option<&Metadata>, dialect: Dialect) -> Result<Cow<'a, str>> {
    match metadata {
        Some(metadata) => {
            let literal = metadata.iter().map(|(tag, value)| (tag.clone(), escape_dollars(value))).collect();
            render(template, &literal, dialect).map(Cow::Owned)
        },
        None => Ok(Cow::Borrowed(template)),
    }
}

fn escape_dollars(value: &MetadataValue) -> MetadataValue {
    match value {
        MetadataValue::Text(text) => MetadataValue::Text(text.replace('$', "$$")),
        MetadataValue::List(list) => MetadataValue::List(list.iter().map(escape_dollars).collect()),
        other => other.clone(),
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).or_raise(|| ErrorKind::Template)
}

/// The action a single step performs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepAction {
    Rename(Rename),
    Shell(Shell),
    MetadataWrite(MetadataWrite),
}

/// One unit of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandStep {
    /// Registry key, used in logs and error messages.
    pub name: Option<String>,
    /// Forces metadata extraction for the file before the pipeline runs.
    pub metadata: bool,
    pub action: StepAction,
}
impl CommandStep {
    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::Rename(_) => StepKind::Rename,
            StepAction::Shell(_) => StepKind::Cmd,
            StepAction::MetadataWrite(_) => StepKind::Metadata,
        }
    }

    /// The registry name, or the step kind for anonymous steps.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.kind().as_str())
    }

    pub fn needs_metadata(&self) -> bool {
        self.metadata
            || match &self.action {
                StepAction::Rename(rename) => rename.uses_metadata(),
                StepAction::MetadataWrite(write) => write.metadata,
                StepAction::Shell(_) => false,
            }
    }

    /// Validates a configured step definition.
    ///
    /// Patterns are compiled here so that typos fail before any file is
    /// touched.
    pub fn from_def(name: Option<&str>, def: StepDef) -> Result<Self> {
        let label = || name.unwrap_or("<inline>").to_string();
        let raw = match def {
            StepDef::Command(command) => RawStep { cmd: Some(command), ..RawStep::default() },
            StepDef::Step(raw) => raw,
        };
        let metadata = raw.metadata;
        let action = match raw.kind.unwrap_or(StepKind::Cmd) {
            StepKind::Rename => StepAction::Rename(raw.into_rename().or_raise(|| ErrorKind::Invalid(label()))?),
            StepKind::Cmd => {
                let command = raw.cmd.ok_or_raise(|| ErrorKind::Invalid(label()))?;
                let shell = Shell { command, in_place: raw.inplace, output_extension: None };
                StepAction::Shell(match raw.out_ext {
                    Some(ext) => shell.with_extension(ext),
                    None => shell,
                })
            },
            StepKind::Metadata => {
                let write = MetadataWrite {
                    tag: raw.tag.ok_or_raise(|| ErrorKind::Invalid(label()))?,
                    pattern: raw.from.unwrap_or_else(|| ".*".to_string()),
                    value: raw.value.ok_or_raise(|| ErrorKind::Invalid(label()))?,
                    metadata: raw.metadata,
                    dialect: raw.dialect,
                };
                compile(&write.pattern).or_raise(|| ErrorKind::Invalid(label()))?;
                StepAction::MetadataWrite(write)
            },
        };
        Ok(Self { name: name.map(str::to_string), metadata, action })
    }
}
impl From<Rename> for CommandStep {
    fn from(rename: Rename) -> Self {
        Self { name: None, metadata: false, action: StepAction::Rename(rename) }
    }
}
impl From<Shell> for CommandStep {
    fn from(shell: Shell) -> Self {
        Self { name: None, metadata: false, action: StepAction::Shell(shell) }
    }
}
impl From<MetadataWrite> for CommandStep {
    fn from(write: MetadataWrite) -> Self {
        Self { name: None, metadata: false, action: StepAction::MetadataWrite(write) }
    }
}

/// A step as written in configuration: a bare command line, or a map.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum StepDef {
    Command(String),
    Step(RawStep),
}

/// The loosely-typed map form of a step, before validation.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawStep {
    #[serde(rename = "type")]
    pub kind: Option<StepKind>,
    pub metadata: bool,
    pub dialect: Dialect,
    // rename
    pub from: Option<String>,
    pub to: Option<String>,
    pub format: Option<CaseMode>,
    #[serde(rename = "do")]
    pub steps: Vec<RawStep>,
    // cmd
    pub cmd: Option<String>,
    pub inplace: bool,
    pub out_ext: Option<String>,
    // metadata
    pub tag: Option<String>,
    pub value: Option<String>,
}
impl RawStep {
    fn into_rename(self) -> Result<Rename> {
        let steps = self.steps.into_iter().map(RawStep::into_rename).collect::<Result<Vec<_>>>()?;
        let replacement = match (self.format, self.to) {
            (Some(case), _) => Replacement::Case(case),
            (None, Some(template)) => Replacement::Template(template),
            // Only a chain of sub-steps may omit both.
            (None, None) if !steps.is_empty() => Replacement::Template(String::new()),
            (None, None) => exn::bail!(ErrorKind::Invalid("rename without `to` or `format`".to_string())),
        };
        let rename = Rename {
            pattern: self.from.unwrap_or_else(|| ".*".to_string()),
            replacement,
            metadata: self.metadata,
            dialect: self.dialect,
            steps,
        };
        if rename.steps.is_empty() {
            compile(&rename.pattern)?;
        }
        Ok(rename)
    }
}

/// An ordered list of steps applied to every job of a batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Task {
    pub steps: Vec<CommandStep>,
    /// All sources of a job collapse into one destination.
    pub merge: bool,
    /// Don't delete sources after a successful commit.
    pub keep: bool,
}
impl Task {
    pub fn new(steps: impl IntoIterator<Item = CommandStep>) -> Self {
        Self { steps: steps.into_iter().collect(), merge: false, keep: false }
    }

    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn needs_metadata(&self) -> bool {
        self.steps.iter().any(CommandStep::needs_metadata)
    }

    /// Checks the constraints that depend on the whole chain.
    ///
    /// A merge task needs a shell step that writes a new file, and its first
    /// non-rename step must not work in place: there is no single source to
    /// stage.
    pub fn validate(&self) -> Result<()> {
        if !self.merge {
            return Ok(());
        }
        let mut effects = self.steps.iter().filter(|s| s.kind() != StepKind::Rename);
        match effects.next().map(|s| (s, &s.action)) {
            Some((_, StepAction::Shell(shell))) if !shell.in_place => Ok(()),
            Some((step, _)) => exn::bail!(ErrorKind::Invalid(step.label().to_string())),
            None => exn::bail!(ErrorKind::Invalid("merge task without a command".to_string())),
        }
    }
}

/// One unit of work for the batch: the source file(s) and the metadata
/// snapshot captured for them.
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    pub sources: Vec<PathBuf>,
    pub metadata: Option<Metadata>,
}
impl Job {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self { sources: vec![source.into()], metadata: None }
    }

    /// A merge job; the first source names the destination.
    pub fn merged(sources: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self { sources: sources.into_iter().map(Into::into).collect(), metadata: None }
    }

    pub fn with_metadata(mut self, metadata: impl Into<Option<Metadata>>) -> Self {
        self.metadata = metadata.into();
        self
    }

    /// The source that destination resolution starts from.
    pub fn primary(&self) -> Result<&Path> {
        self.sources.first().map(PathBuf::as_path).ok_or_raise(|| ErrorKind::Invalid("job without sources".to_string()))
    }

    /// The primary source as text, which is what renames operate on.
    pub fn filename(&self) -> Result<&str> {
        let primary = self.primary()?;
        primary.to_str().ok_or_raise(|| ErrorKind::Invalid(primary.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(yaml: &str) -> Result<CommandStep> {
        let def: StepDef = serde_json::from_str(yaml).unwrap();
        CommandStep::from_def(Some("test"), def)
    }

    #[test]
    fn test_bare_string_is_a_command() {
        let step = parse(r#""convert {in} {out}""#).unwrap();
        assert_eq!(step.kind(), StepKind::Cmd);
        assert_eq!(step.action, StepAction::Shell(Shell::new("convert {in} {out}")));
        assert_eq!(step.label(), "test");
    }

    #[test]
    fn test_missing_type_defaults_to_command() {
        let step = parse(r#"{"cmd": "gzip {in}", "inplace": true, "out_ext": ".gz"}"#).unwrap();
        assert_eq!(step.action, StepAction::Shell(Shell::new("gzip {in}").in_place().with_extension("gz")));
    }

    #[test]
    fn test_rename_definition() {
        let step = parse(r#"{"type": "rename", "from": "IMG_(\\d+)", "to": "photo-$1"}"#).unwrap();
        assert_eq!(step.action, StepAction::Rename(Rename::new(r"IMG_(\d+)", "photo-$1")));
        assert!(!step.needs_metadata());
    }

    #[test]
    fn test_rename_with_sub_steps() {
        let step = parse(r#"{"type": "rename", "do": [{"from": "a", "to": "b"}, {"from": "c", "format": "upper"}]}"#)
            .unwrap();
        let StepAction::Rename(rename) = step.action else { panic!("expected a rename") };
        assert_eq!(rename.steps, vec![Rename::new("a", "b"), Rename::case("c", CaseMode::Upper)]);
    }

    #[test]
    fn test_metadata_definition() {
        let step =
            parse(r#"{"type": "metadata", "tag": "Title", "from": "(\\w+)\\.jpg", "value": "$1", "metadata": true}"#)
                .unwrap();
        assert_eq!(step.kind(), StepKind::Metadata);
        assert!(step.needs_metadata());
    }

    #[rstest]
    #[case(r#"{"type": "rename", "from": "a"}"#)]
    #[case(r#"{"type": "rename", "from": "(", "to": "b"}"#)]
    #[case(r#"{"type": "metadata", "value": "x"}"#)]
    #[case(r#"{"inplace": true}"#)]
    fn test_invalid_definitions(#[case] json: &str) {
        let err = parse(json).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(name) if name == "test"));
    }

    #[test]
    fn test_pattern_quantifiers_survive_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("Model", "X100");
        let rename = Rename::new(r"^(\d{4})", "{Model}-$1").with_metadata();
        assert_eq!(rename.apply("2021.jpg", Some(&metadata)).unwrap(), "X100-2021.jpg");
    }

    #[rstest]
    #[case("photo-001.jpg", "photo-XYZ.jpg")]
    #[case("a1b2", "aXYZb2")]
    #[case("none", "none")]
    fn test_rename_replaces_first_match_only(#[case] input: &str, #[case] expected: &str) {
        let rename = Rename::new(r"\d+", "XYZ");
        assert_eq!(rename.apply(input, None).unwrap(), expected);
    }

    #[test]
    fn test_rename_case_modes() {
        assert_eq!(Rename::case(r"\.[a-z]+$", CaseMode::Upper).apply("a.jpg", None).unwrap(), "a.JPG");
        assert_eq!(Rename::case(r"^[A-Z]+", CaseMode::Lower).apply("IMG.JPG", None).unwrap(), "img.JPG");
    }

    #[test]
    fn test_rename_chain_in_sequence() {
        let rename = Rename::chain([Rename::new("a", "b"), Rename::new("b", "c")]);
        assert_eq!(rename.apply("ab", None).unwrap(), "cb");
    }

    #[test]
    fn test_rename_metadata_only_when_requested() {
        let mut metadata = Metadata::new();
        metadata.insert("Model", "X100");
        let plain = Rename::new("^", "{Model}-");
        assert_eq!(plain.apply("a.jpg", Some(&metadata)).unwrap(), "{Model}-a.jpg");
        let templated = plain.clone().with_metadata();
        assert_eq!(templated.apply("a.jpg", Some(&metadata)).unwrap(), "X100-a.jpg");
        // Without metadata the template is used as-is.
        assert_eq!(templated.apply("a.jpg", None).unwrap(), "{Model}-a.jpg");
    }

    #[test]
    fn test_rename_missing_metadata_key() {
        let rename = Rename::new("^", "{Missing}-").with_metadata();
        let err = rename.apply("a.jpg", Some(&Metadata::new())).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Template));
    }

    #[test]
    fn test_dollar_in_metadata_stays_literal() {
        let mut metadata = Metadata::new();
        metadata.insert("Artist", "Ke$ha");
        metadata.insert("Album", "$1 Deals");
        let rename = Rename::new(r"^(\w+)", "{Artist} - $1").with_metadata();
        assert_eq!(rename.apply("a.mp3", Some(&metadata)).unwrap(), "Ke$ha - a.mp3");

        let write = MetadataWrite::new("Title", r"(\w+)\.mp3$", "{Album}: $1").with_metadata();
        assert_eq!(write.value("song.mp3", Some(&metadata)).unwrap(), "$1 Deals: song");
    }

    #[test]
    fn test_metadata_write_value() {
        let write = MetadataWrite::new("Title", r"(\w+)-(\d+)\.jpg$", "$1 #$2");
        assert_eq!(write.value("dir/holiday-12.jpg", None).unwrap(), "holiday #12");
        assert!(write.value("nothing.png", None).is_err());
    }

    #[test]
    fn test_merge_validation() {
        let merge = |steps: Vec<CommandStep>| Task::new(steps).with_merge(true).validate();
        assert!(merge(vec![Shell::new("cat {in} > {out}").into()]).is_ok());
        assert!(merge(vec![Rename::new("a", "b").into(), Shell::new("cat {in} > {out}").into()]).is_ok());
        assert!(merge(vec![Shell::new("touch {in}").in_place().into()]).is_err());
        assert!(merge(vec![MetadataWrite::new("T", ".*", "x").into()]).is_err());
        assert!(merge(vec![Rename::new("a", "b").into()]).is_err());
        assert!(Task::new([Shell::new("touch {in}").in_place().into()]).validate().is_ok());
    }

    #[test]
    fn test_job_filename() {
        let job = Job::merged(["b.txt", "a.txt"]);
        assert_eq!(job.filename().unwrap(), "b.txt");
        assert!(Job::merged(Vec::<PathBuf>::new()).filename().is_err());
    }
}
