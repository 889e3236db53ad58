use camino::Utf8PathBuf;
use thiserror::Error;

use crate::task::StepKind;

/// Problems with the pipeline configuration. These are detected while the
/// graph is composed, before anything on disk is touched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file.\n{0}")]
    Parse(#[from] serde_json::Error),

    #[error("Task '{0}': invalid glob pattern '{1}'.\n{2}")]
    Pattern(String, String, glob::PatternError),

    #[error("Task '{0}': output file name must not be empty")]
    EmptyFile(String),

    #[error("Task '{0}': output file name '{1}' must not contain a path separator")]
    NestedFile(String, String),

    #[error("Task '{0}': fingerprint task needs at least one page pattern")]
    NoPages(String),

    #[error("Task name '{0}' is used more than once")]
    Duplicate(String),
}

/// A failure reported by one of the external transforms (bundler, style
/// compiler, minifiers).
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),

    #[cfg(feature = "styles")]
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error("Style compilation is not available, enable the `styles` feature")]
    StylesDisabled,

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A failure inside a single step of a task.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("'{0}': {1}")]
    Io(Utf8PathBuf, std::io::Error),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Manifest for group '{0}' not found at '{1}', did the rev step run?")]
    ManifestMismatch(String, Utf8PathBuf),

    #[error("Couldn't build the reference rewriting pattern.\n{0}")]
    Rewrite(#[from] regex::Error),

    #[error("Manifest '{0}' is malformed.\n{1}")]
    Manifest(Utf8PathBuf, serde_json::Error),

    #[error("Fingerprint group '{0}': step '{1}' called in state {2:?}")]
    OutOfOrder(String, StepKind, crate::fingerprint::Stage),
}

/// Extension used to attach the offending path to raw IO errors.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<Utf8PathBuf>) -> Result<T, StepError>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: impl Into<Utf8PathBuf>) -> Result<T, StepError> {
        self.map_err(|e| StepError::Io(path.into(), e))
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Task '{task}' failed in step '{step}':\n{source}")]
    Step {
        task: String,
        step: StepKind,
        source: StepError,
    },

    #[error("Task '{0}' panicked: {1}")]
    Panic(String, String),
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ClearError(#[from] pub StepError);

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Error while clearing the build directory:\n{0}")]
    Clear(#[from] ClearError),

    #[error("Error while building.\n{0}")]
    Build(#[from] BuildError),

    #[error("Error while starting the dev server:\n{0}")]
    Server(anyhow::Error),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[cfg(not(feature = "live"))]
    #[error("Development mode is not available, enable the `live` feature")]
    LiveDisabled,
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't resolve watch path '{0}'.\n{1}")]
    Resolve(String, anyhow::Error),
}
