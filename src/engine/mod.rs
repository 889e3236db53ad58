//! Execution of composed graphs.
//!
//! Groups run one after another. Tasks of a parallel group are spawned on
//! the rayon pool and report back over a channel, tasks of a series group
//! run on the calling thread. The steps of a task always run sequentially.

mod diagnostics;
mod rebuild;
#[cfg(feature = "live")]
mod watch;

use std::sync::LazyLock;
use std::sync::mpsc::channel;
use std::time::Instant;

use indicatif::ProgressStyle;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::as_overhead;
use crate::error::BuildError;
use crate::graph::{ExecutionGraph, Group};
use crate::task::Task;

pub use diagnostics::{Diagnostics, StepRecord};
pub(crate) use diagnostics::Journal;
pub use rebuild::{Dispatcher, Rebuilder, Scheduled};
#[cfg(feature = "live")]
pub(crate) use watch::watch;

static STYLE_GROUP: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

static STYLE_TASK: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .expect("Error setting progress bar template")
});

/// Runs every group in order. The first failure stops the run, a failing
/// parallel group still lets its in-flight tasks finish before returning.
pub fn run_graph(graph: &ExecutionGraph) -> Result<Diagnostics, BuildError> {
    let s = Instant::now();
    let journal = Journal::default();

    for group in &graph.groups {
        match group {
            Group::Parallel(tasks) => {
                if let Some(error) = run_parallel(tasks, &journal).into_iter().find_map(Result::err) {
                    return Err(error);
                }
            }
            Group::Series(tasks) => {
                for task in tasks {
                    run_task(task, &journal)?;
                }
            }
        }
    }

    let diagnostics = journal.finish();
    tracing::info!("finished {diagnostics} {}", as_overhead(s));
    Ok(diagnostics)
}

/// Runs every group like [`run_graph`], but failures are only logged.
pub(crate) fn run_reporting(graph: &ExecutionGraph) -> Diagnostics {
    let s = Instant::now();
    let journal = Journal::default();
    let mut failed = 0;

    for group in &graph.groups {
        let results = match group {
            Group::Parallel(tasks) => run_parallel(tasks, &journal),
            Group::Series(tasks) => tasks.iter().map(|task| run_task(task, &journal)).collect(),
        };

        for error in results.into_iter().filter_map(Result::err) {
            tracing::error!("{error}");
            failed += 1;
        }
    }

    let diagnostics = journal.finish();
    if failed > 0 {
        tracing::warn!("{failed} tasks failed, {diagnostics} {}", as_overhead(s));
    } else {
        tracing::info!("finished {diagnostics} {}", as_overhead(s));
    }
    diagnostics
}

/// Results are returned in completion order once every task has ended.
fn run_parallel(tasks: &[Task], journal: &Journal) -> Vec<Result<(), BuildError>> {
    if tasks.is_empty() {
        return Vec::new();
    }

    let root = tracing::span!(Level::INFO, "running_tasks");
    root.pb_set_length(tasks.len() as u64);
    root.pb_set_style(&STYLE_GROUP);
    root.pb_set_message("Running tasks...");
    let _enter = root.enter();

    let (sender, receiver) = channel();

    // Nothing may block inside the scope: on a single thread pool the thread
    // waiting on the scope is the one running the tasks.
    rayon::scope(|s| {
        for task in tasks {
            let sender = sender.clone();
            let root = &root;

            s.spawn(move |_| {
                let result = root.in_scope(|| run_task(task, journal));
                root.pb_inc(1);
                // The receiver outlives the scope.
                let _ = sender.send(result);
            });
        }
    });

    drop(sender);
    receiver.into_iter().collect()
}

pub(crate) fn run_task(task: &Task, journal: &Journal) -> Result<(), BuildError> {
    let span = tracing::span!(Level::INFO, "task", name = %task.name);
    span.pb_set_style(&STYLE_TASK);
    span.pb_set_message(&format!("Running {}", task.name));
    let _enter = span.enter();

    // A task only shares the journal with other threads, which stays
    // consistent even if a step panics halfway.
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| task.run(journal))) {
        Ok(result) => result,
        Err(panic) => {
            let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                String::from("unknown payload")
            };

            Err(BuildError::Panic(task.name.clone(), msg))
        }
    }
}
