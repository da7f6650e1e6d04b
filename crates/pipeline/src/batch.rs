//! Concurrent execution of many jobs.
//!
//! A [`Batch`] runs the same [`Task`] over a list of [`Job`]s on Tokio's
//! blocking pool, at most [`Batch::with_concurrency`] at a time. Jobs are
//! promoted in submission order; completion order is whatever the jobs make
//! of it. All jobs share one [`FsGuard`], so no two of them can commit to
//! the same destination.

use crate::error::{ErrorKind, Result};
use crate::execute::{Action, FsGuard, execute};
use crate::model::{Job, Task};
use crate::{Context, DEFAULT_CONCURRENCY};
use async_stream::stream;
use exn::ResultExt;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

/// Progress events emitted by [`Batch::run`].
///
/// Events follow a strict ordering:
/// 1. [`Started`](Self::Started): exactly once, with the number of jobs.
/// 2. [`Finished`](Self::Finished): once per job, in completion order.
/// 3. [`Complete`](Self::Complete): exactly once, when every job is done.
#[derive(Debug)]
pub enum BatchEvent {
    Started(usize),
    Finished(JobReport),
    Complete,
}

/// The outcome of one job, with the batch's progress at the time it
/// finished.
#[derive(Debug)]
pub struct JobReport {
    pub sources: Vec<PathBuf>,
    pub result: Result<Action>,
    /// How many jobs have finished, this one included. Strictly increasing
    /// across the reports of a batch.
    pub completed: usize,
    pub total: usize,
}
impl JobReport {
    /// Whether the job failed, as opposed to succeeding or being skipped.
    pub fn is_failure(&self) -> bool {
        matches!(&self.result, Err(e) if !e.is_skip())
    }
}

/// Runs one task over many jobs.
pub struct Batch {
    ctx: Arc<Context>,
    task: Arc<Task>,
    guard: Arc<FsGuard>,
    cancel: Arc<AtomicBool>,
    concurrency: usize,
}
impl Batch {
    pub fn new(ctx: Context, task: Task) -> Self {
        Self {
            ctx: Arc::new(ctx),
            task: Arc::new(task),
            guard: Arc::new(FsGuard::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Shares destination claims with a planner that already ran over the
    /// same jobs.
    pub fn with_guard(mut self, guard: Arc<FsGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Sets how many jobs may run at once; at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Raising this flag makes every job that hasn't committed yet stop at
    /// its next step boundary with [`ErrorKind::Cancelled`].
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Streams [`BatchEvent`]s while running every job.
    ///
    /// A failing job never stops the others; its error is in its
    /// [`JobReport`].
    pub fn run(&self, jobs: Vec<Job>) -> impl Stream<Item = BatchEvent> + '_ {
        // `rustfmt` does not format macros that use braces. Wrap in parentheses!
        stream!({
            let total = jobs.len();
            yield BatchEvent::Started(total);

            let mut pending = jobs.into_iter();
            let mut processing = FuturesUnordered::new();
            processing.extend(pending.by_ref().take(self.concurrency).map(|job| self.spawn(job)));
            let mut completed = 0;
            while let Some((sources, result)) = processing.next().await {
                completed += 1;
                yield BatchEvent::Finished(JobReport { sources, result, completed, total });
                // Pop-n-push, FIFO.
                if let Some(job) = pending.next() {
                    processing.push(self.spawn(job));
                }
            }

            yield BatchEvent::Complete;
        })
    }

    /// Runs every job and collects the reports, in completion order.
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    pub async fn run_to_completion(&self, jobs: Vec<Job>) -> Vec<JobReport> {
        let events = self.run(jobs);
        futures::pin_mut!(events);
        let mut reports = vec![];
        while let Some(event) = events.next().await {
            if let BatchEvent::Finished(report) = event {
                reports.push(report);
            }
        }
        reports
    }

    /// Starts a job on the blocking pool. Jobs are only spawned when promoted,
    /// so the pool never holds more than `concurrency` of them.
    fn spawn(&self, job: Job) -> impl Future<Output = (Vec<PathBuf>, Result<Action>)> + use<> {
        let ctx = Arc::clone(&self.ctx);
        let task = Arc::clone(&self.task);
        let guard = Arc::clone(&self.guard);
        let cancel = Arc::clone(&self.cancel);
        let sources = job.sources.clone();
        let handle = tokio::task::spawn_blocking(move || execute(&ctx, &task, &job, &guard, &cancel));
        async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(e).or_raise(|| ErrorKind::Worker),
            };
            match &result {
                Ok(action) => tracing::debug!(?action, "Job finished"),
                Err(e) if e.is_skip() => tracing::warn!(error = %e, "Job skipped"),
                Err(e) => tracing::error!(error = ?e, "Job failed"),
            }
            (sources, result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Rename, Shell};
    use std::fs;
    use tempfile::TempDir;

    fn jobs(dir: &TempDir, names: &[&str]) -> Vec<Job> {
        names
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                fs::write(&path, name).unwrap();
                Job::new(path)
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_events_and_progress() {
        let dir = TempDir::new().unwrap();
        let task = Task::new([Shell::new("cp {in} {out}").with_extension("bak").into()]);
        let batch = Batch::new(Context::default(), task).with_concurrency(2);

        let events: Vec<_> = batch.run(jobs(&dir, &["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"])).collect().await;
        assert!(matches!(events.first(), Some(BatchEvent::Started(5))));
        assert!(matches!(events.last(), Some(BatchEvent::Complete)));
        let progress: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                BatchEvent::Finished(report) => Some((report.completed, report.total, report.result.is_ok())),
                _ => None,
            })
            .collect();
        assert_eq!(progress, (1..=5).map(|n| (n, 5, true)).collect::<Vec<_>>());
        for name in ["a", "b", "c", "d", "e"] {
            assert!(dir.path().join(format!("{name}.bak")).exists());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_destination_one_winner() {
        let dir = TempDir::new().unwrap();
        let task = Task::new([Rename::new(r"[^/]+$", "same.txt").into(), Shell::new("cp {in} {out}").into()]);
        let batch = Batch::new(Context::default(), task).with_concurrency(4);

        let reports = batch.run_to_completion(jobs(&dir, &["a.txt", "b.txt", "c.txt", "d.txt"])).await;
        assert_eq!(reports.len(), 4);
        let committed: Vec<_> = reports.iter().filter(|r| r.result.is_ok()).collect();
        assert_eq!(committed.len(), 1);
        for report in reports.iter().filter(|r| r.result.is_err()) {
            assert!(matches!(report.result.as_ref().map_err(|e| &**e), Err(ErrorKind::DestinationConflict(_))));
            assert!(!report.is_failure());
            // The losers keep their sources.
            assert!(report.sources[0].exists());
        }
        let winner = committed[0].sources[0].file_name().unwrap().to_str().unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("same.txt")).unwrap(), winner);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_batch() {
        let dir = TempDir::new().unwrap();
        let command = "case {in} in *b.txt*) exit 1;; esac; cp {in} {out}";
        let task = Task::new([Shell::new(command).with_extension("out").into()]);
        let batch = Batch::new(Context::default(), task);

        let reports = batch.run_to_completion(jobs(&dir, &["a.txt", "b.txt", "c.txt"])).await;
        let failed: Vec<_> = reports.iter().filter(|r| r.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].sources[0].ends_with("b.txt"));
        assert!(dir.path().join("a.out").exists());
        assert!(dir.path().join("c.out").exists());
        assert!(dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_batch_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let task = Task::new([Shell::new("cp {in} {out}").with_extension("out").into()]);
        let batch = Batch::new(Context::default(), task).with_concurrency(1);
        batch.cancel();

        let reports = batch.run_to_completion(jobs(&dir, &["a.txt", "b.txt"])).await;
        assert_eq!(reports.len(), 2);
        for report in &reports {
            assert!(matches!(report.result.as_ref().map_err(|e| &**e), Err(ErrorKind::Cancelled)));
        }
        assert!(!dir.path().join("a.out").exists());
        assert!(!dir.path().join("b.out").exists());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let batch = Batch::new(Context::default(), Task::default());
        let events: Vec<_> = batch.run(vec![]).collect().await;
        assert!(matches!(events.as_slice(), [BatchEvent::Started(0), BatchEvent::Complete]));
    }
}
