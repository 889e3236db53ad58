//! Watch mode is made of three parts:
//!
//! 1. **File watcher**: the `notify` debouncer monitors the static roots of
//!    every watch pattern recursively, so rapid saves produce one event.
//! 2. **Rebuilders**: every task with watch patterns owns a worker thread
//!    which coalesces bursts of changes into a single extra run.
//! 3. **Dev server**: after a successful rebuild the server is told to
//!    reload connected browsers.

use std::collections::HashSet;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use crate::error::WatchError;
use crate::graph::WatchMap;
use crate::io::glob_base;
use crate::server::DevServer;

use super::Dispatcher;

/// Blocks until the watcher channel closes.
pub(crate) fn watch(map: &WatchMap, server: Arc<dyn DevServer>) -> Result<(), WatchError> {
    let pwd = Utf8PathBuf::try_from(env::current_dir()?)
        .map_err(|e| WatchError::Resolve(".".into(), e.into()))?;

    let dispatcher = Dispatcher::spawn(map.clone(), server);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    let mut roots = HashSet::new();
    for pattern in map.patterns() {
        roots.insert(resolve_watch_root(pattern)?);
    }

    for root in collapse_watch_paths(roots) {
        tracing::info!("watching {}", root);
        debouncer.watch(root.as_std_path(), RecursiveMode::Recursive)?;
    }

    tracing::info!("initial build completed, now watching for changes...");

    while let Ok(result) = rx.recv() {
        let events = match result {
            Ok(events) => events,
            Err(errors) => {
                tracing::error!("watch error: {:?}", errors);
                continue;
            }
        };

        let mut changed = Vec::new();
        for de in events {
            if !matches!(
                de.event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }

            for path in &de.event.paths {
                let Ok(path) = Utf8PathBuf::try_from(path.clone()) else {
                    continue;
                };

                if let Ok(relative) = path.strip_prefix(&pwd) {
                    changed.push(relative.to_path_buf());
                }
                changed.push(path);
            }
        }

        let paths: Vec<&Utf8Path> = changed.iter().map(|path| path.as_path()).collect();
        dispatcher.changed(&paths);
    }

    drop(debouncer);
    dispatcher.shutdown();

    Ok(())
}

/// Canonical directory to watch for a glob. Patterns pointing at a single
/// file watch its parent so atomic saves are seen. Roots that don't exist
/// yet fall back to their closest existing ancestor.
fn resolve_watch_root(pattern: &str) -> Result<Utf8PathBuf, WatchError> {
    let mut root = if crate::io::has_magic(pattern) {
        glob_base(pattern)
    } else {
        let path = Utf8PathBuf::from(pattern);
        if path.is_dir() { path } else { glob_base(pattern) }
    };

    loop {
        if root.as_str().is_empty() {
            root = Utf8PathBuf::from(".");
        }
        if root.exists() {
            break;
        }
        if !root.pop() {
            root = Utf8PathBuf::from(".");
        }
    }

    root.canonicalize_utf8()
        .map_err(|e| WatchError::Resolve(pattern.to_string(), e.into()))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// A recursive watch on `/a` already covers `/a/b`, so after sorting every
/// path nested in a previously accepted one is dropped.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
