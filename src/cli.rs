//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;
use tracing::Level;

/// Rename and transform files with rules from a configuration file.
///
/// Without `--apply`, the planned changes are shown and confirmed before
/// anything runs.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Directories (or single files) to process.
    #[arg(default_value = ".")]
    pub directories: Vec<PathBuf>,

    /// Skip directories matching any of these patterns; replaces the
    /// configured `ignore_dir`.
    #[arg(long, num_args = 1..)]
    pub ignore_dir: Vec<String>,

    /// Only consider files whose name matches one of these patterns.
    #[arg(long, num_args = 1.., default_value = ".*")]
    pub filename: Vec<String>,

    /// Extract metadata even if no command needs it.
    #[arg(long)]
    pub metadata: bool,

    /// Print the metadata of the first file as JSON and exit.
    #[arg(long)]
    pub view: bool,

    /// Apply the changes without asking.
    #[arg(long, conflicts_with = "dry_run")]
    pub apply: bool,

    /// Only show the changes.
    #[arg(long)]
    pub dry_run: bool,

    /// A configured task, or the configured commands to run in order.
    #[arg(long, num_args = 1..)]
    pub task: Vec<String>,

    /// The configuration file; the user's config directory is searched
    /// when omitted.
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Combine every file ending up at the same destination into one.
    #[arg(long)]
    pub merge: bool,

    /// Keep the source files.
    #[arg(long)]
    pub keep: bool,

    /// How many files to process at once; overrides `nb_process`.
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Increase verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
impl Cli {
    pub fn level(&self) -> Level {
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rstest::rstest;

    #[test]
    fn test_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["metatask"]).unwrap();
        assert_eq!(cli.directories, [PathBuf::from(".")]);
        assert_eq!(cli.filename, [".*"]);
        assert!(cli.ignore_dir.is_empty());
        assert!(cli.task.is_empty());
        assert!(!cli.apply && !cli.dry_run && !cli.merge && !cli.keep);
        assert_eq!(cli.jobs, None);
    }

    #[test]
    fn test_lists() {
        let cli = Cli::try_parse_from([
            "metatask", "--task", "lower", "png", "--filename", "IMG", ".*\\.png$", "--jobs", "2", "photos",
        ])
        .unwrap();
        // Lists stop at the next flag; the trailing positional would be
        // swallowed by `--task` if it came right after it.
        assert_eq!(cli.task, ["lower", "png"]);
        assert_eq!(cli.filename, ["IMG", ".*\\.png$"]);
        assert_eq!(cli.jobs, Some(2));
        assert_eq!(cli.directories, [PathBuf::from("photos")]);
    }

    #[test]
    fn test_apply_conflicts_with_dry_run() {
        assert!(Cli::try_parse_from(["metatask", "--apply", "--dry-run"]).is_err());
    }

    #[rstest]
    #[case(&["metatask"], Level::WARN)]
    #[case(&["metatask", "-v"], Level::INFO)]
    #[case(&["metatask", "-vv"], Level::DEBUG)]
    #[case(&["metatask", "-vvvv"], Level::TRACE)]
    fn test_level(#[case] args: &[&str], #[case] expected: Level) {
        assert_eq!(Cli::try_parse_from(args).unwrap().level(), expected);
    }
}
