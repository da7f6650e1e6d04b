//! Terminal rendering of previews and progress.

use colored::{Color, Colorize};
use metatask_pipeline::JobReport;
use metatask_pipeline::error::Error;
use metatask_pipeline::diff::{Decomposition, decompose};
use metatask_pipeline::plan::ConflictReason;
use std::path::{Path, PathBuf};

/// What happens to `sources`: a highlighted diff against the destination,
/// or the file name alone when only its contents change.
pub fn preview(sources: &[PathBuf], destination: &str) -> String {
    match sources {
        [source] if source == Path::new(destination) => destination.blue().to_string(),
        _ => diff(sources, destination),
    }
}

/// One `-` line per source in red and a `+` line for the destination in
/// green, the differing part of each in reverse video.
pub fn diff(sources: &[PathBuf], destination: &str) -> String {
    let sources: Vec<_> = sources.iter().map(|source| source.to_string_lossy().into_owned()).collect();
    let parts = decompose(&sources, destination);
    let mut lines: Vec<_> =
        parts.sources.iter().map(|middle| format!("- {}", highlight(&parts, middle, Color::Red))).collect();
    lines.push(format!("+ {}", highlight(&parts, &parts.destination, Color::Green)));
    lines.join("\n")
}

fn highlight(parts: &Decomposition, middle: &str, color: Color) -> String {
    format!("{}{}{}", parts.prefix.color(color), middle.color(color).reversed(), parts.suffix.color(color))
}

pub fn conflict(reason: ConflictReason) -> String {
    reason.to_string().red().to_string()
}

pub fn progress(report: &JobReport) -> String {
    format!("{}/{}", report.completed, report.total)
}

/// The error of a failed or skipped job, `None` when it succeeded.
pub fn outcome(report: &JobReport) -> Option<String> {
    let error = report.result.as_ref().err()?;
    let line = error_line(&report.sources, error);
    Some(if report.is_failure() { line.red().to_string() } else { line.yellow().to_string() })
}

pub fn failure(sources: &[PathBuf], error: &Error) -> String {
    error_line(sources, error).red().to_string()
}

fn error_line(sources: &[PathBuf], error: &Error) -> String {
    let sources = sources.iter().map(|source| source.display().to_string()).collect::<Vec<_>>().join(", ");
    format!("{sources}: {}", **error)
}
