//! Compiling descriptors into runnable tasks.
//!
//! A [`Task`] is a named list of [`Step`]s which always run in order, each
//! one only after the previous step returned successfully. Compilation only
//! validates the descriptor and captures it in closures, nothing is read or
//! written until a step is actually run.

use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::core::Mode;
use crate::descriptor::{self, Minify, TaskDescriptor, TaskKind};
use crate::engine::Journal;
use crate::error::{BuildError, ConfigError, StepError};
use crate::fingerprint::Revision;
use crate::io;
use crate::transform::Transform;

/// Which part of a task's lifecycle a step implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Remove the previous output of the task.
    Clean,
    /// Produce the output.
    Run,
    /// Fingerprint: hash outputs and write the manifest.
    Rev,
    /// Fingerprint: rewrite references in pages using the manifest.
    Replace,
    /// Fingerprint: delete the manifest.
    Cleanup,
}

impl Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepKind::Clean => "clean",
            StepKind::Run => "run",
            StepKind::Rev => "rev",
            StepKind::Replace => "replace",
            StepKind::Cleanup => "cleanup",
        })
    }
}

type Action = Arc<dyn Fn() -> Result<(), StepError> + Send + Sync>;

/// A single invokable step of a task.
#[derive(Clone)]
pub struct Step {
    pub kind: StepKind,
    action: Action,
}

impl Step {
    pub(crate) fn new<F>(kind: StepKind, action: F) -> Self
    where
        F: Fn() -> Result<(), StepError> + Send + Sync + 'static,
    {
        Self {
            kind,
            action: Arc::new(action),
        }
    }

    pub fn run(&self) -> Result<(), StepError> {
        (self.action)()
    }
}

impl Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Step({})", self.kind)
    }
}

/// A compiled build step.
#[derive(Clone, Debug)]
pub struct Task {
    /// Unique name within a run.
    pub name: String,
    /// Steps executed strictly in order.
    pub steps: Vec<Step>,
    /// Patterns which trigger a rebuild of this task in dev mode.
    pub watch: Vec<String>,
}

impl Task {
    /// Runs every step in order, stopping at the first failure.
    pub(crate) fn run(&self, journal: &Journal) -> Result<(), BuildError> {
        for step in &self.steps {
            let start = Instant::now();

            step.run().map_err(|source| BuildError::Step {
                task: self.name.clone(),
                step: step.kind,
                source,
            })?;

            journal.record(&self.name, step.kind, start);
        }

        Ok(())
    }

    pub fn step_kinds(&self) -> Vec<StepKind> {
        self.steps.iter().map(|step| step.kind).collect()
    }
}

/// Turns descriptors into tasks bound to a set of transforms.
#[derive(Clone)]
pub struct Compiler {
    transform: Arc<dyn Transform>,
    mode: Mode,
}

impl Compiler {
    pub fn new(transform: Arc<dyn Transform>, mode: Mode) -> Self {
        Self { transform, mode }
    }

    /// Validates a descriptor and builds its steps.
    pub fn compile(&self, descriptor: &TaskDescriptor) -> Result<Task, ConfigError> {
        let name = &descriptor.name;
        validate_patterns(name, descriptor.kind.sources())?;
        validate_patterns(name, &descriptor.kind.watch_patterns())?;

        let steps = match &descriptor.kind {
            TaskKind::Concat(task) => {
                validate_file(name, &task.file)?;
                let output = task.build.join(&task.file);
                let task = task.clone();
                let transform = self.transform.clone();

                vec![
                    clean_path(output),
                    Step::new(StepKind::Run, move || concat(&task, transform.as_ref())),
                ]
            }
            TaskKind::Copy(task) => {
                let task = task.clone();

                vec![
                    clean_path(task.build.clone()),
                    Step::new(StepKind::Run, move || copy(&task)),
                ]
            }
            TaskKind::StyleCompile(task) => {
                validate_file(name, &task.file)?;
                let output = task.build.join(&task.file);
                let task = task.clone();
                let transform = self.transform.clone();

                vec![
                    clean_path(output),
                    Step::new(StepKind::Run, move || style(&task, transform.as_ref())),
                ]
            }
            TaskKind::Bundle(task) => {
                if let Some(file) = &task.file {
                    validate_file(name, file)?;
                }
                let task = task.clone();
                let transform = self.transform.clone();
                let production = self.mode.is_production();

                vec![Step::new(StepKind::Run, move || {
                    bundle(&task, transform.as_ref(), production)
                })]
            }
            TaskKind::Clean(task) => {
                let task = task.clone();

                vec![Step::new(StepKind::Run, move || {
                    let removed = io::remove_all(&task.src)?;
                    tracing::debug!("removed {removed} paths");
                    Ok(())
                })]
            }
            TaskKind::Fingerprint(task) => {
                if task.page.is_empty() {
                    return Err(ConfigError::NoPages(name.clone()));
                }
                validate_patterns(name, &task.page)?;

                let revision = Arc::new(Revision::new(name.clone(), task.clone()));
                let rev = revision.clone();
                let replace = revision.clone();
                let cleanup = revision;

                vec![
                    Step::new(StepKind::Rev, move || rev.rev().map(drop)),
                    Step::new(StepKind::Replace, move || replace.replace().map(drop)),
                    Step::new(StepKind::Cleanup, move || cleanup.clean()),
                ]
            }
        };

        tracing::debug!("compiled {} task {name} for {}", descriptor.kind.label(), self.mode);

        Ok(Task {
            name: name.clone(),
            steps,
            watch: descriptor.kind.watch_patterns(),
        })
    }
}

fn validate_patterns(name: &str, patterns: &[String]) -> Result<(), ConfigError> {
    for pattern in patterns {
        let raw = pattern.strip_prefix('!').unwrap_or(pattern);
        glob::Pattern::new(raw)
            .map_err(|e| ConfigError::Pattern(name.to_string(), pattern.clone(), e))?;
    }
    Ok(())
}

fn validate_file(name: &str, file: &str) -> Result<(), ConfigError> {
    if file.trim().is_empty() {
        return Err(ConfigError::EmptyFile(name.to_string()));
    }
    if file.contains(['/', '\\']) {
        return Err(ConfigError::NestedFile(name.to_string(), file.to_string()));
    }
    Ok(())
}

fn clean_path(path: Utf8PathBuf) -> Step {
    Step::new(StepKind::Clean, move || io::remove(&path).map(drop))
}

fn minify(
    transform: &dyn Transform,
    flags: &std::collections::BTreeSet<Minify>,
    mut text: String,
) -> Result<String, StepError> {
    for flag in flags {
        text = match flag {
            Minify::Script => transform.minify_script(&text)?,
            Minify::Style => transform.minify_style(&text)?,
            Minify::Markup => transform.minify_markup(&text)?,
        };
    }
    Ok(text)
}

fn concat(task: &descriptor::Concat, transform: &dyn Transform) -> Result<(), StepError> {
    let matched = io::expand(&task.src)?;
    if matched.is_empty() {
        tracing::debug!("nothing to concatenate into {}", task.file);
        return Ok(());
    }

    let mut parts = Vec::with_capacity(matched.len());
    for file in &matched {
        parts.push(io::read_to_string(&file.path)?);
    }

    let text = minify(transform, &task.minify, parts.join("\n"))?;
    io::write(&task.build.join(&task.file), text)
}

fn copy(task: &descriptor::Copy) -> Result<(), StepError> {
    let matched = io::expand(&task.src)?;

    for file in &matched {
        io::copy(&file.path, &task.build.join(file.relative()))?;
    }

    tracing::debug!("copied {} files to {}", matched.len(), task.build);
    Ok(())
}

fn style(task: &descriptor::StyleCompile, transform: &dyn Transform) -> Result<(), StepError> {
    let sources = paths(io::expand(&task.src)?);
    if sources.is_empty() {
        tracing::debug!("no stylesheets for {}", task.file);
        return Ok(());
    }

    let text = transform.compile_style(&sources)?;
    let text = minify(transform, &task.minify, text)?;
    io::write(&task.build.join(&task.file), text)
}

fn bundle(
    task: &descriptor::Bundle,
    transform: &dyn Transform,
    production: bool,
) -> Result<(), StepError> {
    let entries = paths(io::expand(&task.src)?);
    transform.bundle(&entries, task, production)?;
    Ok(())
}

fn paths(matched: Vec<io::Matched>) -> Vec<Utf8PathBuf> {
    matched.into_iter().map(|m| m.path).collect()
}
