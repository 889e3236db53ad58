//! Declarative build step descriptions and the pipeline config file.
//!
//! Nothing in here touches the filesystem apart from [`Config::load`]; the
//! descriptors are plain data that [`crate::task::Compiler`] turns into
//! runnable tasks.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;

/// One named build step.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDescriptor {
    pub name: String,
    pub kind: TaskKind,
}

impl TaskDescriptor {
    pub fn new(name: impl Into<String>, kind: impl Into<TaskKind>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// The closed set of things a build step can do. Each variant only carries the
/// fields it needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Concat(Concat),
    Copy(Copy),
    #[serde(alias = "less", alias = "style")]
    StyleCompile(StyleCompile),
    #[serde(alias = "webpack")]
    Bundle(Bundle),
    Clean(Clean),
    #[serde(alias = "md5")]
    Fingerprint(Fingerprint),
}

impl TaskKind {
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Concat(_) => "concat",
            TaskKind::Copy(_) => "copy",
            TaskKind::StyleCompile(_) => "style",
            TaskKind::Bundle(_) => "bundle",
            TaskKind::Clean(_) => "clean",
            TaskKind::Fingerprint(_) => "fingerprint",
        }
    }

    /// Source patterns of this step, empty for kinds without sources.
    pub fn sources(&self) -> &[String] {
        match self {
            TaskKind::Concat(task) => &task.src,
            TaskKind::Copy(task) => &task.src,
            TaskKind::StyleCompile(task) => &task.src,
            TaskKind::Bundle(task) => &task.src,
            TaskKind::Clean(task) => &task.src,
            TaskKind::Fingerprint(task) => &task.src,
        }
    }

    /// Patterns which should trigger a rebuild in dev mode. Falls back to the
    /// source patterns; exclusions are dropped.
    pub fn watch_patterns(&self) -> Vec<String> {
        let explicit = match self {
            TaskKind::Concat(task) => task.watch.as_deref(),
            TaskKind::Copy(task) => task.watch.as_deref(),
            TaskKind::StyleCompile(task) => task.watch.as_deref(),
            TaskKind::Bundle(task) => task.watch.as_deref(),
            TaskKind::Clean(_) | TaskKind::Fingerprint(_) => Some(&[][..]),
        };

        explicit
            .unwrap_or_else(|| self.sources())
            .iter()
            .filter(|pattern| !pattern.starts_with('!'))
            .cloned()
            .collect()
    }
}

/// Minifier toggles applied to a single output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Minify {
    Script,
    Style,
    Markup,
}

/// Concatenate sources into one file, optionally minified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Concat {
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,
    pub build: Utf8PathBuf,
    pub file: String,
    #[serde(default)]
    pub watch: Option<Vec<String>>,
    #[serde(default)]
    pub minify: BTreeSet<Minify>,
}

/// Copy sources verbatim, keeping their layout below the pattern base.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Copy {
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,
    pub build: Utf8PathBuf,
    #[serde(default)]
    pub watch: Option<Vec<String>>,
}

/// Compile stylesheets and join them into one file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StyleCompile {
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,
    pub build: Utf8PathBuf,
    pub file: String,
    #[serde(default)]
    pub watch: Option<Vec<String>>,
    #[serde(default)]
    pub minify: BTreeSet<Minify>,
}

/// Hand the entry points over to the module bundler.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Bundle {
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,
    pub build: Utf8PathBuf,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub watch: Option<Vec<String>>,
}

/// Delete paths or glob matches.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Clean {
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,
}

/// Content-hash outputs and rewrite references to them in pages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Fingerprint {
    #[serde(default, deserialize_with = "one_or_many")]
    pub src: Vec<String>,
    pub build: Utf8PathBuf,
    #[serde(default, deserialize_with = "one_or_many")]
    pub page: Vec<String>,
    #[serde(alias = "pageBuild")]
    pub page_build: Utf8PathBuf,
}

macro_rules! impl_into_kind {
    ($($ty:ident),*) => {
        $(impl From<$ty> for TaskKind {
            fn from(value: $ty) -> Self {
                TaskKind::$ty(value)
            }
        })*
    };
}

impl_into_kind!(Concat, Copy, StyleCompile, Bundle, Clean, Fingerprint);

/// Production fingerprint groups, in the order they have to run. Later groups
/// may reference files renamed by earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProdGroup {
    VendorScript,
    AppScript,
    AppStyle,
}

impl ProdGroup {
    pub const ORDER: [ProdGroup; 3] = [
        ProdGroup::VendorScript,
        ProdGroup::AppScript,
        ProdGroup::AppStyle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProdGroup::VendorScript => "vendor.script.md5",
            ProdGroup::AppScript => "app.script.md5",
            ProdGroup::AppStyle => "app.style.md5",
        }
    }
}

/// Name of the last production step, removing leftovers once every group
/// has been fingerprinted.
pub const FINAL_CLEAN: &str = "app.md5.clean";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Production {
    #[serde(default, rename = "vendor.script.md5")]
    pub vendor_script: Option<Fingerprint>,
    #[serde(default, rename = "app.script.md5")]
    pub app_script: Option<Fingerprint>,
    #[serde(default, rename = "app.style.md5")]
    pub app_style: Option<Fingerprint>,
    #[serde(default, rename = "app.md5.clean")]
    pub cleanup: Option<Clean>,
}

impl Production {
    pub fn group(&self, group: ProdGroup) -> Option<&Fingerprint> {
        match group {
            ProdGroup::VendorScript => self.vendor_script.as_ref(),
            ProdGroup::AppScript => self.app_script.as_ref(),
            ProdGroup::AppStyle => self.app_style.as_ref(),
        }
    }
}

/// The whole pipeline, as read from `pipeline.json`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// Root of the build output, cleared at the start of every run.
    #[serde(default = "default_build")]
    pub build: Utf8PathBuf,
    /// URL prefix the application is served under.
    #[serde(default = "default_route_base")]
    pub route_base: String,
    /// Steps shared by both modes, in declaration order.
    #[serde(default, deserialize_with = "ordered")]
    pub base: Vec<TaskDescriptor>,
    #[serde(default)]
    pub prod: Production,
}

fn default_build() -> Utf8PathBuf {
    Utf8PathBuf::from("build/web")
}

fn default_route_base() -> String {
    String::from("/")
}

impl Config {
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        text.parse()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(one) if one.trim().is_empty() => vec![],
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

/// Reads a JSON object into a list, keeping the order the keys were written in.
fn ordered<'de, D>(de: D) -> Result<Vec<TaskDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedVisitor;

    impl<'de> Visitor<'de> for OrderedVisitor {
        type Value = Vec<TaskDescriptor>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map of task names to task descriptors")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut tasks = Vec::new();
            while let Some((name, kind)) = map.next_entry::<String, TaskKind>()? {
                tasks.push(TaskDescriptor { name, kind });
            }
            Ok(tasks)
        }
    }

    de.deserialize_map(OrderedVisitor)
}
