use std::sync::Arc;
use std::sync::mpsc::{SyncSender, TrySendError, sync_channel};
use std::thread::JoinHandle;
use std::time::Instant;

use camino::Utf8Path;

use crate::core::as_overhead;
use crate::error::BuildError;
use crate::graph::WatchMap;
use crate::server::DevServer;
use crate::task::Task;

use super::{Journal, run_task};

/// What happened to a rebuild request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// A rebuild will run.
    Queued,
    /// A rebuild was already pending, the request was merged into it.
    Coalesced,
    /// The rebuilder has shut down.
    Stopped,
}

/// Background worker rebuilding a single task on request.
///
/// At most one rebuild runs at a time and at most one more is remembered
/// while it runs, so a burst of changes results in at most one extra run.
pub struct Rebuilder {
    name: String,
    sender: SyncSender<()>,
    thread: JoinHandle<()>,
}

impl Rebuilder {
    /// Spawns the worker thread. `done` is called on the worker after every
    /// rebuild with its outcome.
    pub fn spawn<F>(task: Task, done: F) -> Self
    where
        F: Fn(&Task, Result<(), BuildError>) + Send + 'static,
    {
        let name = task.name.clone();
        let (sender, receiver) = sync_channel::<()>(1);

        let thread = std::thread::spawn(move || {
            while receiver.recv().is_ok() {
                let s = Instant::now();
                let result = run_task(&task, &Journal::default());

                if result.is_ok() {
                    tracing::info!("rebuilt {} {}", task.name, as_overhead(s));
                }

                done(&task, result);
            }
        });

        Self {
            name,
            sender,
            thread,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requests a rebuild without ever blocking the caller.
    pub fn trigger(&self) -> Scheduled {
        match self.sender.try_send(()) {
            Ok(()) => Scheduled::Queued,
            Err(TrySendError::Full(())) => Scheduled::Coalesced,
            Err(TrySendError::Disconnected(())) => Scheduled::Stopped,
        }
    }

    /// Lets a pending rebuild finish and waits for the worker to exit.
    pub fn shutdown(self) {
        drop(self.sender);

        if self.thread.join().is_err() {
            tracing::error!("rebuild worker for {} panicked", self.name);
        }
    }
}

/// Routes changed paths to the rebuilders of the tasks watching them. A
/// successful rebuild reloads the browsers, a failed one is only logged.
pub struct Dispatcher {
    map: WatchMap,
    rebuilders: Vec<Rebuilder>,
}

impl Dispatcher {
    pub fn spawn(map: WatchMap, server: Arc<dyn DevServer>) -> Self {
        let rebuilders = map
            .triggers
            .iter()
            .map(|trigger| {
                let server = server.clone();
                Rebuilder::spawn(trigger.task.clone(), move |task, result| match result {
                    Ok(()) => server.reload(),
                    Err(e) => tracing::error!("rebuilding {} failed:\n{e}", task.name),
                })
            })
            .collect();

        Self { map, rebuilders }
    }

    /// Schedules a rebuild of every task matching any of the paths. Returns
    /// how many tasks were matched.
    pub fn changed(&self, paths: &[&Utf8Path]) -> usize {
        let mut matched = 0;

        for index in self.map.matching(paths) {
            let rebuilder = &self.rebuilders[index];
            matched += 1;

            match rebuilder.trigger() {
                Scheduled::Queued => tracing::info!("change detected, rebuilding {}", rebuilder.name()),
                Scheduled::Coalesced => tracing::debug!("rebuild of {} already pending", rebuilder.name()),
                Scheduled::Stopped => tracing::warn!("rebuilder for {} is gone", rebuilder.name()),
            }
        }

        matched
    }

    /// Lets pending rebuilds finish and stops every worker.
    pub fn shutdown(self) {
        for rebuilder in self.rebuilders {
            rebuilder.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Mutex};

    use glob::Pattern;

    use super::*;
    use crate::graph::Trigger;
    use crate::server::testing::Counting;
    use crate::task::{Step, StepKind};

    fn counted(name: &str, runs: &Arc<AtomicUsize>, fail: bool) -> Task {
        let runs = runs.clone();
        Task {
            name: name.into(),
            steps: vec![Step::new(StepKind::Run, move || {
                runs.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(crate::error::StepError::Io(
                        "broken.scss".into(),
                        std::io::Error::other("syntax"),
                    ))
                } else {
                    Ok(())
                }
            })],
            watch: vec![],
        }
    }

    fn trigger(task: Task, pattern: &str) -> Trigger {
        Trigger {
            task,
            patterns: vec![Pattern::new(pattern).unwrap()],
        }
    }

    #[test]
    fn test_burst_coalesces_into_one_rebuild() {
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = channel();
        let (gate_tx, gate_rx) = channel::<()>();
        let gate_rx = Mutex::new(gate_rx);

        let counter = runs.clone();
        let task = Task {
            name: "app.style".into(),
            steps: vec![Step::new(StepKind::Run, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                started_tx.send(()).unwrap();
                gate_rx.lock().unwrap().recv().unwrap();
                Ok(())
            })],
            watch: vec![],
        };

        let (done_tx, done_rx) = channel();
        let rebuilder = Rebuilder::spawn(task, move |_, result| {
            done_tx.send(result.is_ok()).unwrap();
        });

        assert_eq!(rebuilder.trigger(), Scheduled::Queued);
        started_rx.recv().unwrap();

        // First rebuild in flight, three more changes arrive.
        assert_eq!(rebuilder.trigger(), Scheduled::Queued);
        assert_eq!(rebuilder.trigger(), Scheduled::Coalesced);
        assert_eq!(rebuilder.trigger(), Scheduled::Coalesced);

        gate_tx.send(()).unwrap();
        started_rx.recv().unwrap();
        gate_tx.send(()).unwrap();

        rebuilder.shutdown();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(done_rx.iter().collect::<Vec<_>>(), [true, true]);
    }

    #[test]
    fn test_failure_is_reported() {
        let task = Task {
            name: "vendor.script".into(),
            steps: vec![Step::new(StepKind::Run, || {
                Err(crate::error::StepError::Io(
                    "vendor.js".into(),
                    std::io::Error::other("gone"),
                ))
            })],
            watch: vec![],
        };

        let (done_tx, done_rx) = channel();
        let rebuilder = Rebuilder::spawn(task, move |task, result| {
            done_tx.send((task.name.clone(), result.is_err())).unwrap();
        });

        assert_eq!(rebuilder.trigger(), Scheduled::Queued);
        assert_eq!(done_rx.recv().unwrap(), ("vendor.script".to_string(), true));

        rebuilder.shutdown();
    }

    #[test]
    fn test_change_rebuilds_only_matching_task_then_reloads() {
        let style_runs = Arc::new(AtomicUsize::new(0));
        let script_runs = Arc::new(AtomicUsize::new(0));
        let map = WatchMap {
            triggers: vec![
                trigger(counted("app.style", &style_runs, false), "src/styles/**/*.scss"),
                trigger(counted("app.script", &script_runs, false), "src/app/**/*.ts"),
            ],
        };

        let server = Arc::new(Counting::default());
        let dispatcher = Dispatcher::spawn(map, server.clone());

        assert_eq!(dispatcher.changed(&[Utf8Path::new("src/styles/base/app.scss")]), 1);
        assert_eq!(dispatcher.changed(&[Utf8Path::new("README.md")]), 0);
        dispatcher.shutdown();

        assert_eq!(style_runs.load(Ordering::SeqCst), 1);
        assert_eq!(script_runs.load(Ordering::SeqCst), 0);
        assert_eq!(server.reloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_rebuild_does_not_reload() {
        let runs = Arc::new(AtomicUsize::new(0));
        let map = WatchMap {
            triggers: vec![trigger(counted("app.style", &runs, true), "src/styles/*.scss")],
        };

        let server = Arc::new(Counting::default());
        let dispatcher = Dispatcher::spawn(map, server.clone());

        assert_eq!(dispatcher.changed(&[Utf8Path::new("src/styles/app.scss")]), 1);
        dispatcher.shutdown();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(server.reloads.load(Ordering::SeqCst), 0);
    }
}
