//! Filesystem primitives shared by every task kind.
//!
//! Deletion always has delete-if-exists semantics, writes create their parent
//! directories, and glob expansion never fails just because nothing matched.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;

use crate::core::as_overhead;
use crate::error::{ClearError, IoContext, StepError};

/// A file matched by a source pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Path as produced by the glob, relative to the working directory.
    pub path: Utf8PathBuf,
    /// Static directory prefix of the pattern that produced this match.
    pub base: Utf8PathBuf,
}

impl Matched {
    /// Path relative to the pattern base, used to mirror directory layouts.
    pub fn relative(&self) -> &Utf8Path {
        match self.path.strip_prefix(&self.base) {
            Ok(rel) if !rel.as_str().is_empty() => rel,
            _ => Utf8Path::new(self.path.file_name().unwrap_or(self.path.as_str())),
        }
    }
}

pub(crate) fn has_magic(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// The leading part of a pattern that contains no wildcards. For a literal
/// file path this is the parent directory.
pub(crate) fn glob_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern);
    let components: Vec<_> = path.components().collect();

    match components.iter().position(|c| has_magic(c.as_str())) {
        Some(split) => components.iter().take(split).collect(),
        None => path.parent().map(Utf8Path::to_path_buf).unwrap_or_default(),
    }
}

/// Expands source patterns in declaration order.
///
/// Patterns starting with `!` remove earlier matches. Files matched by more
/// than one pattern are reported once, at their first position.
pub(crate) fn expand(patterns: &[String]) -> Result<Vec<Matched>, StepError> {
    let mut matched: Vec<Matched> = Vec::new();
    let mut seen = HashSet::new();

    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            let negated = Pattern::new(negated)?;
            matched.retain(|m| !negated.matches_path(m.path.as_std_path()));
            continue;
        }

        let base = glob_base(pattern);
        for path in glob::glob(pattern)? {
            let path = Utf8PathBuf::try_from(path?)?;
            if path.is_dir() {
                continue;
            }
            if seen.insert(path.clone()) {
                matched.push(Matched {
                    path,
                    base: base.clone(),
                });
            }
        }
    }

    Ok(matched)
}

/// Deletes a file or a directory tree. A path that does not exist counts as
/// deleted; the return value tells whether anything was there.
pub(crate) fn remove(path: &Utf8Path) -> Result<bool, StepError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StepError::Io(path.to_path_buf(), e)),
    };

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StepError::Io(path.to_path_buf(), e)),
    }
}

/// Deletes every path, expanding globs. Patterns that match nothing are fine.
pub(crate) fn remove_all(patterns: &[String]) -> Result<usize, StepError> {
    let mut removed = 0;

    for pattern in patterns {
        if has_magic(pattern) {
            for path in glob::glob(pattern)? {
                let path = Utf8PathBuf::try_from(path?)?;
                removed += usize::from(remove(&path)?);
            }
        } else {
            removed += usize::from(remove(Utf8Path::new(pattern))?);
        }
    }

    Ok(removed)
}

fn ensure_parent(path: &Utf8Path) -> Result<(), StepError> {
    match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => fs::create_dir_all(dir).at(dir),
        _ => Ok(()),
    }
}

pub(crate) fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> Result<(), StepError> {
    ensure_parent(path)?;
    fs::write(path, data).at(path)
}

pub(crate) fn copy(from: &Utf8Path, to: &Utf8Path) -> Result<(), StepError> {
    ensure_parent(to)?;
    fs::copy(from, to).at(to)?;
    Ok(())
}

pub(crate) fn read_to_string(path: &Utf8Path) -> Result<String, StepError> {
    fs::read_to_string(path).at(path)
}

/// Delete the whole build directory if it exists and recreate it empty.
pub(crate) fn clear_dir(dir: &Utf8Path) -> Result<(), ClearError> {
    let s = Instant::now();

    remove(dir)?;
    fs::create_dir_all(dir).at(dir)?;

    tracing::info!("cleaned the build directory {dir} {}", as_overhead(s));

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Temporary directory usable as a UTF-8 root for glob patterns.
    pub(crate) fn tmp() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    pub(crate) fn touch(path: &Utf8Path, data: &str) {
        write(path, data).unwrap();
    }

    #[test]
    fn test_glob_base() {
        assert_eq!(glob_base("assets/*.png"), "assets");
        assert_eq!(glob_base("src/**/*.js"), "src");
        assert_eq!(glob_base("src/app.js"), "src");
        assert_eq!(glob_base("*.js"), "");
        assert_eq!(glob_base("a/b/c?/d.js"), "a/b");
    }

    #[test]
    fn test_expand_keeps_pattern_order() {
        let (_dir, root) = tmp();
        touch(&root.join("lib/z.js"), "z");
        touch(&root.join("app/a.js"), "a");
        touch(&root.join("app/b.js"), "b");

        let found = expand(&[
            root.join("lib/*.js").to_string(),
            root.join("app/*.js").to_string(),
        ])
        .unwrap();

        let names: Vec<_> = found.iter().map(|m| m.relative().as_str()).collect();
        assert_eq!(names, ["z.js", "a.js", "b.js"]);
    }

    #[test]
    fn test_expand_dedups_and_excludes() {
        let (_dir, root) = tmp();
        touch(&root.join("app/a.js"), "a");
        touch(&root.join("app/a.test.js"), "t");
        touch(&root.join("app/b.js"), "b");

        let found = expand(&[
            root.join("app/a.js").to_string(),
            root.join("app/*.js").to_string(),
            format!("!{}", root.join("app/*.test.js")),
        ])
        .unwrap();

        let names: Vec<_> = found.iter().map(|m| m.relative().as_str()).collect();
        assert_eq!(names, ["a.js", "b.js"]);
    }

    #[test]
    fn test_expand_nothing_matches() {
        let (_dir, root) = tmp();
        let found = expand(&[root.join("missing/**/*.css").to_string()]).unwrap();
        assert!(found.is_empty());
        assert!(expand(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_relative_preserves_nesting() {
        let (_dir, root) = tmp();
        touch(&root.join("assets/img/icons/x.svg"), "<svg/>");

        let found = expand(&[root.join("assets/**/*.svg").to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative().as_str(), "img/icons/x.svg");
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let (_dir, root) = tmp();
        assert!(!remove(&root.join("not/here")).unwrap());
        assert_eq!(remove_all(&[root.join("gone.js").to_string()]).unwrap(), 0);
        assert_eq!(remove_all(&[root.join("nope/*.json").to_string()]).unwrap(), 0);
    }

    #[test]
    fn test_clear_dir() {
        let (_dir, root) = tmp();
        let build = root.join("build/web");
        touch(&build.join("old/index.html"), "stale");

        clear_dir(&build).unwrap();

        assert!(build.is_dir());
        assert!(!build.join("old").exists());
    }
}
