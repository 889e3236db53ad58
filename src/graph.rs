//! Composition of compiled tasks into the execution graph of a run.

use std::collections::HashSet;

use camino::Utf8Path;
use glob::Pattern;

use crate::descriptor::{Config, FINAL_CLEAN, ProdGroup, TaskDescriptor};
use crate::error::ConfigError;
use crate::task::{Compiler, Task};

/// A set of tasks with a single execution policy.
#[derive(Debug, Clone)]
pub enum Group {
    /// Tasks run concurrently, the group ends when all of them have ended.
    Parallel(Vec<Task>),
    /// Tasks run one after another on the calling thread.
    Series(Vec<Task>),
}

impl Group {
    pub fn tasks(&self) -> &[Task] {
        match self {
            Group::Parallel(tasks) | Group::Series(tasks) => tasks,
        }
    }
}

/// Groups executed in order, each one only after the previous fully ended.
#[derive(Debug, Clone, Default)]
pub struct ExecutionGraph {
    pub groups: Vec<Group>,
}

impl ExecutionGraph {
    pub fn task_count(&self) -> usize {
        self.groups.iter().map(|group| group.tasks().len()).sum()
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .flat_map(Group::tasks)
            .map(|task| task.name.as_str())
            .collect()
    }
}

/// Watch patterns of a single task.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub task: Task,
    pub patterns: Vec<Pattern>,
}

impl Trigger {
    pub fn matches(&self, path: &Utf8Path) -> bool {
        self.patterns
            .iter()
            .any(|pattern| pattern.matches_path(path.as_std_path()))
    }
}

/// Associates every dev task with the patterns that trigger its rebuild.
#[derive(Debug, Clone, Default)]
pub struct WatchMap {
    pub triggers: Vec<Trigger>,
}

impl WatchMap {
    /// Indices of every trigger matching any of the given spellings of a
    /// changed path.
    pub fn matching<'a>(
        &'a self,
        paths: &'a [&'a Utf8Path],
    ) -> impl Iterator<Item = usize> + 'a {
        self.triggers
            .iter()
            .enumerate()
            .filter(|(_, trigger)| paths.iter().any(|path| trigger.matches(path)))
            .map(|(index, _)| index)
    }

    /// Every raw watch pattern, used to decide which directories to watch.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.triggers
            .iter()
            .flat_map(|trigger| trigger.patterns.iter().map(Pattern::as_str))
    }
}

/// Dev mode: a single parallel group plus the watch map.
#[derive(Debug, Clone)]
pub struct DevGraph {
    pub graph: ExecutionGraph,
    pub watch: WatchMap,
}

pub fn compose_dev(config: &Config, compiler: &Compiler) -> Result<DevGraph, ConfigError> {
    check_names(config)?;

    let tasks = compile_base(config, compiler)?;
    let mut triggers = Vec::with_capacity(tasks.len());

    for task in &tasks {
        let patterns = task
            .watch
            .iter()
            .map(|raw| {
                Pattern::new(raw)
                    .map_err(|e| ConfigError::Pattern(task.name.clone(), raw.clone(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !patterns.is_empty() {
            triggers.push(Trigger {
                task: task.clone(),
                patterns,
            });
        }
    }

    Ok(DevGraph {
        graph: ExecutionGraph {
            groups: vec![Group::Parallel(tasks)],
        },
        watch: WatchMap { triggers },
    })
}

/// Production: base tasks in parallel, then the fingerprint groups and the
/// final cleanup in their fixed order. Missing groups are skipped.
pub fn compose_prod(config: &Config, compiler: &Compiler) -> Result<ExecutionGraph, ConfigError> {
    check_names(config)?;

    let mut groups = Vec::new();

    let base = compile_base(config, compiler)?;
    if !base.is_empty() {
        groups.push(Group::Parallel(base));
    }

    let mut series = Vec::new();
    for group in ProdGroup::ORDER {
        if let Some(fingerprint) = config.prod.group(group) {
            series.push(compiler.compile(&TaskDescriptor::new(group.name(), fingerprint.clone()))?);
        }
    }
    if let Some(cleanup) = &config.prod.cleanup {
        series.push(compiler.compile(&TaskDescriptor::new(FINAL_CLEAN, cleanup.clone()))?);
    }
    if !series.is_empty() {
        groups.push(Group::Series(series));
    }

    Ok(ExecutionGraph { groups })
}

fn compile_base(config: &Config, compiler: &Compiler) -> Result<Vec<Task>, ConfigError> {
    config
        .base
        .iter()
        .map(|descriptor| compiler.compile(descriptor))
        .collect()
}

fn check_names(config: &Config) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    let prod = ProdGroup::ORDER
        .into_iter()
        .filter(|group| config.prod.group(*group).is_some())
        .map(|group| group.name())
        .chain(config.prod.cleanup.as_ref().map(|_| FINAL_CLEAN));

    for name in config.base.iter().map(|d| d.name.as_str()).chain(prod) {
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::Mode;
    use crate::descriptor::{Clean, Copy, Fingerprint, Production};
    use crate::task::StepKind;
    use crate::transform::testing::Recorder;

    fn compiler(mode: Mode) -> Compiler {
        Compiler::new(Arc::new(Recorder::default()), mode)
    }

    fn fingerprint(name: &str) -> Fingerprint {
        Fingerprint {
            src: vec![format!("build/{name}")],
            build: "build".into(),
            page: vec!["build/index.html".into()],
            page_build: "build".into(),
        }
    }

    fn config() -> Config {
        Config {
            build: "build".into(),
            route_base: "/".into(),
            base: vec![
                TaskDescriptor::new(
                    "assets",
                    Copy {
                        src: vec!["src/assets/**/*".into(), "!src/assets/**/*.psd".into()],
                        build: "build/assets".into(),
                        watch: None,
                    },
                ),
                TaskDescriptor::new(
                    "clean-maps",
                    Clean {
                        src: vec!["build/**/*.map".into()],
                    },
                ),
            ],
            prod: Production::default(),
        }
    }

    #[test]
    fn test_compose_dev() {
        let dev = compose_dev(&config(), &compiler(Mode::Dev)).unwrap();

        assert_eq!(dev.graph.groups.len(), 1);
        assert!(matches!(&dev.graph.groups[0], Group::Parallel(tasks) if tasks.len() == 2));

        // Clean tasks have nothing to watch.
        assert_eq!(dev.watch.triggers.len(), 1);
        assert_eq!(dev.watch.patterns().collect::<Vec<_>>(), ["src/assets/**/*"]);

        let changed = [Utf8Path::new("src/assets/img/logo.png")];
        assert_eq!(dev.watch.matching(&changed).collect::<Vec<_>>(), [0]);

        let unrelated = [Utf8Path::new("src/app/main.ts")];
        assert_eq!(dev.watch.matching(&unrelated).count(), 0);
    }

    #[test]
    fn test_compose_prod_order() {
        let mut config = config();
        config.prod = Production {
            vendor_script: Some(fingerprint("vendor.js")),
            app_script: None,
            app_style: Some(fingerprint("app.css")),
            cleanup: Some(Clean {
                src: vec!["build/vendor.js".into(), "build/app.css".into()],
            }),
        };

        let graph = compose_prod(&config, &compiler(Mode::Prod)).unwrap();

        assert_eq!(graph.groups.len(), 2);
        assert!(matches!(graph.groups[0], Group::Parallel(_)));
        assert!(matches!(graph.groups[1], Group::Series(_)));
        assert_eq!(
            graph.task_names(),
            ["assets", "clean-maps", "vendor.script.md5", "app.style.md5", "app.md5.clean"]
        );
        assert_eq!(
            graph.groups[1].tasks()[0].step_kinds(),
            [StepKind::Rev, StepKind::Replace, StepKind::Cleanup]
        );
    }

    #[test]
    fn test_compose_prod_without_groups() {
        let graph = compose_prod(&config(), &compiler(Mode::Prod)).unwrap();
        assert_eq!(graph.groups.len(), 1);
        assert_eq!(graph.task_count(), 2);
    }

    #[test]
    fn test_demo_pipeline() {
        let config: Config = include_str!("../demos/pipeline.json").parse().unwrap();

        let dev = compose_dev(&config, &compiler(Mode::Dev)).unwrap();
        assert_eq!(dev.graph.task_count(), 5);
        assert_eq!(dev.watch.triggers.len(), 5);

        let prod = compose_prod(&config, &compiler(Mode::Prod)).unwrap();
        assert_eq!(
            prod.groups[1].tasks().iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["vendor.script.md5", "app.script.md5", "app.style.md5", "app.md5.clean"]
        );
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = config();
        config.base.push(TaskDescriptor::new(
            "vendor.script.md5",
            Clean { src: vec![] },
        ));
        config.prod.vendor_script = Some(fingerprint("vendor.js"));

        assert!(matches!(
            compose_prod(&config, &compiler(Mode::Prod)),
            Err(ConfigError::Duplicate(name)) if name == "vendor.script.md5"
        ));
    }
}
