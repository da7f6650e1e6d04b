//! Rule-driven batch file renaming and transformation.
//!
//! A run has three phases:
//! 1. Discovery: walk the given directories, extract metadata if any
//!    command needs it, and build one job per file (or per destination when
//!    merging).
//! 2. Preview: plan every job, print what would change and why some jobs
//!    can't run.
//! 3. Apply: run the accepted jobs concurrently. Jobs that only rename are
//!    applied without asking; anything with side effects needs confirmation.

mod cli;
mod display;
mod error;
mod prompt;

use crate::cli::Cli;
use crate::error::{ErrorKind, Result};
use clap::Parser;
use colored::Colorize;
use exn::ResultExt;
use futures::StreamExt;
use metatask_config::{Config, Registry};
use metatask_metadata::{Exiftool, Extractor, WriterHandle};
use metatask_pipeline::plan::{Plan, Planner};
use metatask_pipeline::walk::Walk;
use metatask_pipeline::{Batch, BatchEvent, Context, Disposition, Job, ShellRunner, StepKind, Task, resolve};
use std::collections::HashMap;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{} {e:?}", "error:".red().bold());
            ExitCode::FAILURE
        },
    }
}

/// `RUST_LOG` wins over `-v` when set.
fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::builder().with_default_directive(cli.level().into()).from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).with_target(false).compact().init();
}

/// Returns whether every job went through.
fn run(cli: Cli) -> Result<bool> {
    let config = Config::load(cli.config_file.as_deref()).or_raise(|| ErrorKind::Config)?;
    let registry = Registry::new(&config).or_raise(|| ErrorKind::Config)?;
    let task = registry.task(&cli.task, cli.merge, cli.keep).or_raise(|| ErrorKind::Config)?;
    if task.steps.is_empty() && !cli.view {
        let commands = registry.commands().collect::<Vec<_>>().join(", ");
        let tasks = registry.tasks().collect::<Vec<_>>().join(", ");
        tracing::warn!(%commands, %tasks, "No task given, every file will be skipped");
    }

    let extracts = cli.metadata || cli.view || task.needs_metadata();
    let writes = task.steps.iter().any(|step| step.kind() == StepKind::Metadata);
    let tool = if extracts || writes { Some(Arc::new(exiftool(&config)?)) } else { None };

    // Discovery.
    let ignore = if cli.ignore_dir.is_empty() { &config.ignore_dir } else { &cli.ignore_dir };
    let walk = Walk::new(cli.directories.iter().cloned(), &cli.filename, ignore).or_raise(|| ErrorKind::Walk)?;
    let mut jobs = vec![];
    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = ?e, "Could not read directory");
                continue;
            },
        };
        let metadata = match tool.as_ref().filter(|_| extracts) {
            Some(tool) => match tool.extract(&entry.path) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    tracing::debug!(error = ?e, path = %entry.path.display(), "Metadata extraction failed");
                    eprintln!("Error on getting metadata on '{}'.", entry.path.display());
                    continue;
                },
            },
            None => None,
        };
        if cli.view {
            let json = serde_json::to_string_pretty(&metadata.unwrap_or_default()).or_raise(|| ErrorKind::Terminal)?;
            println!("{json}");
            return Ok(true);
        }
        jobs.push(Job::new(entry.path).with_metadata(metadata));
    }
    if task.merge {
        jobs = merge_jobs(&task, jobs);
    }
    tracing::info!(jobs = jobs.len(), "Discovered files");

    // Preview.
    let mut succeeded = true;
    let planner = Planner::new(&task);
    let mut ready = vec![];
    for job in jobs {
        let sources = job.sources.clone();
        match planner.plan(job) {
            Ok(Plan::Skip(_)) => (),
            Ok(Plan::Ready { job, resolution }) => {
                println!("{}", display::preview(&job.sources, &resolution.destination));
                for message in &resolution.messages {
                    println!("  {message}");
                }
                ready.push((job, resolution.disposition()));
            },
            Ok(Plan::Conflict { job, resolution, reason }) => {
                println!("{}", display::preview(&job.sources, &resolution.destination));
                eprintln!("{}", display::conflict(reason));
            },
            Err(e) => {
                eprintln!("{}", display::failure(&sources, &e));
                succeeded = false;
            },
        }
    }
    let guard = planner.guard();
    if cli.dry_run {
        return Ok(succeeded);
    }
    let gated = ready.iter().any(|(_, disposition)| *disposition == Disposition::SideEffects);
    let confirmed = if gated && !cli.apply {
        prompt::confirm(io::stdin().lock(), io::stdout(), "Confirm", false).or_raise(|| ErrorKind::Terminal)?
    } else {
        true
    };
    let accepted = accepted_jobs(ready, confirmed);
    if accepted.is_empty() {
        return Ok(succeeded);
    }

    // Apply.
    let mut ctx = Context::new(Arc::new(ShellRunner::new(&config.shell)));
    if let Some(tool) = tool.filter(|_| writes) {
        let writer: WriterHandle = tool;
        ctx = ctx.with_writer(writer);
    }
    if let Some(temp_dir) = &config.temp_dir {
        ctx = ctx.with_temp_dir(temp_dir);
    }
    let batch = Batch::new(ctx, task).with_guard(guard).with_concurrency(cli.jobs.unwrap_or(config.nb_process));
    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build().or_raise(|| ErrorKind::Runtime)?;
    Ok(runtime.block_on(apply(&batch, accepted)) && succeeded)
}

fn exiftool(config: &Config) -> Result<Exiftool> {
    match &config.metadata_tool {
        Some(path) => Ok(Exiftool::new(path)),
        None => Exiftool::discover().or_raise(|| ErrorKind::Metadata),
    }
}

/// Keeps rename-only jobs whatever the answer; the rest only when confirmed.
/// Discovery order is preserved.
fn accepted_jobs(ready: Vec<(Job, Disposition)>, confirmed: bool) -> Vec<Job> {
    ready
        .into_iter()
        .filter(|(_, disposition)| confirmed || *disposition == Disposition::RenameOnly)
        .map(|(job, _)| job)
        .collect()
}

/// Collapses jobs that resolve to the same destination into one merge job,
/// in discovery order. A job whose destination can't be resolved stays on
/// its own; planning reports the error.
fn merge_jobs(task: &Task, jobs: Vec<Job>) -> Vec<Job> {
    let mut merged: Vec<Job> = vec![];
    let mut index: HashMap<String, usize> = HashMap::new();
    for job in jobs {
        let destination = job
            .filename()
            .ok()
            .and_then(|filename| resolve(&task.steps, filename, job.metadata.as_ref()).ok())
            .map(|resolution| resolution.destination);
        match destination.as_ref().and_then(|destination| index.get(destination)) {
            Some(&i) => merged[i].sources.extend(job.sources),
            None => {
                if let Some(destination) = destination {
                    index.insert(destination, merged.len());
                }
                merged.push(job);
            },
        }
    }
    merged
}

/// Runs the batch, printing progress. Returns whether every job went
/// through; an interrupted batch didn't.
async fn apply(batch: &Batch, jobs: Vec<Job>) -> bool {
    let cancel = batch.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling pending jobs");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let events = batch.run(jobs);
    futures::pin_mut!(events);
    let mut succeeded = true;
    while let Some(event) = events.next().await {
        match event {
            BatchEvent::Started(total) => tracing::info!(total, "Applying"),
            BatchEvent::Finished(report) => {
                succeeded &= !report.is_failure();
                if let Some(line) = display::outcome(&report) {
                    eprintln!("{line}");
                }
                println!("{}", display::progress(&report));
            },
            BatchEvent::Complete => tracing::info!("Done"),
        }
    }
    succeeded && !batch.cancel_flag().load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use metatask_pipeline::model::{Rename, Shell};
    use rstest::rstest;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_merge_jobs_by_destination() {
        let task = Task::new([Rename::new(r"_part\d+", "").into(), Shell::new("cat {in} > {out}").into()])
            .with_merge(true);
        let jobs = ["a_part1.txt", "b_part1.txt", "a_part2.txt", "c.txt"].map(Job::new).to_vec();

        let merged = merge_jobs(&task, jobs);
        let sources: Vec<_> = merged.iter().map(|job| job.sources.clone()).collect();
        assert_eq!(
            sources,
            [
                vec![PathBuf::from("a_part1.txt"), PathBuf::from("a_part2.txt")],
                vec![PathBuf::from("b_part1.txt")],
                vec![PathBuf::from("c.txt")],
            ]
        );
    }

    #[rstest]
    #[case::declined(false, &["a.jpg", "c.jpg"])]
    #[case::confirmed(true, &["a.jpg", "b.txt", "c.jpg"])]
    fn test_rename_only_jobs_skip_confirmation(#[case] confirmed: bool, #[case] expected: &[&str]) {
        let ready = vec![
            (Job::new("a.jpg"), Disposition::RenameOnly),
            (Job::new("b.txt"), Disposition::SideEffects),
            (Job::new("c.jpg"), Disposition::RenameOnly),
        ];
        let accepted: Vec<_> = accepted_jobs(ready, confirmed).into_iter().map(|job| job.sources).collect();
        let expected: Vec<_> = expected.iter().map(|name| vec![PathBuf::from(name)]).collect();
        assert_eq!(accepted, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_apply_reports_failures() {
        let dir = TempDir::new().unwrap();
        for name in ["good.txt", "bad.txt"] {
            fs::write(dir.path().join(name), name).unwrap();
        }
        let command = "case {in} in *bad*) exit 3;; esac; cp {in} {out}";
        let task = Task::new([Shell::new(command).with_extension("out").into()]);
        let batch = Batch::new(Context::default(), task);

        let jobs = vec![Job::new(dir.path().join("good.txt")), Job::new(dir.path().join("bad.txt"))];
        assert!(!apply(&batch, jobs).await);
        assert!(dir.path().join("good.out").exists());

        // Sources are gone once committed.
        assert!(!dir.path().join("good.txt").exists());
        let task = Task::new([Shell::new("cp {in} {out}").with_extension("bak").into()]);
        let batch = Batch::new(Context::default(), task);
        assert!(apply(&batch, vec![Job::new(dir.path().join("good.out"))]).await);
        assert!(dir.path().join("good.bak").exists());
    }
}
