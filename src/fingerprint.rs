//! Content hashed asset names for cache busting.
//!
//! A fingerprint group runs three sub-steps in a fixed order. `rev` writes a
//! hashed copy of every source file together with a manifest, `replace`
//! rewrites page references using that manifest, and `clean` deletes the
//! manifest again. The hashed copies are never removed here.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::core::{Hash32, as_overhead};
use crate::descriptor::Fingerprint;
use crate::error::{IoContext, StepError};
use crate::io;
use crate::task::StepKind;

/// Original relative name to hashed relative name, forward slashes only.
pub type Manifest = BTreeMap<String, String>;

/// Progress of a fingerprint group through its sub-steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    Revved,
    Replaced,
    CleanedUp,
}

/// A single fingerprint group and the stage it has reached.
#[derive(Debug)]
pub struct Revision {
    name: String,
    target: Fingerprint,
    stage: Mutex<Stage>,
}

impl Revision {
    pub fn new(name: impl Into<String>, target: Fingerprint) -> Self {
        Self {
            name: name.into(),
            target,
            stage: Mutex::new(Stage::Pending),
        }
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn manifest_path(&self) -> Utf8PathBuf {
        self.target.build.join(format!("{}.rev.json", self.name))
    }

    /// Hashes every source file and writes the manifest. A completed group
    /// may be revved again, which starts a new cycle.
    pub fn rev(&self) -> Result<Manifest, StepError> {
        self.advance(
            StepKind::Rev,
            &[Stage::Pending, Stage::CleanedUp],
            Stage::Revved,
            || self.write_revisions(),
        )
    }

    /// Rewrites references in every page, returns the number of replacements.
    pub fn replace(&self) -> Result<usize, StepError> {
        self.advance(StepKind::Replace, &[Stage::Revved], Stage::Replaced, || {
            self.rewrite_pages()
        })
    }

    /// Deletes every manifest in the group's build directory.
    pub fn clean(&self) -> Result<(), StepError> {
        self.advance(StepKind::Cleanup, &[Stage::Replaced], Stage::CleanedUp, || {
            let pattern = format!("{}/*.rev.json", glob::Pattern::escape(self.target.build.as_str()));
            let removed = io::remove_all(&[pattern])?;
            tracing::debug!("{}: removed {removed} manifests", self.name);
            Ok(())
        })
    }

    fn advance<T>(
        &self,
        step: StepKind,
        from: &[Stage],
        to: Stage,
        work: impl FnOnce() -> Result<T, StepError>,
    ) -> Result<T, StepError> {
        let mut stage = self.stage.lock().unwrap_or_else(|poison| poison.into_inner());

        if !from.contains(&stage) {
            return Err(StepError::OutOfOrder(self.name.clone(), step, *stage));
        }

        let out = work()?;
        *stage = to;
        Ok(out)
    }

    fn write_revisions(&self) -> Result<Manifest, StepError> {
        let s = Instant::now();
        let mut manifest = Manifest::new();

        for file in io::expand(&self.target.src)? {
            let hash = Hash32::hash_file(&file.path).at(&file.path)?;
            let relative = file.relative();
            let hashed = hashed_name(relative, hash);

            io::copy(&file.path, &self.target.build.join(&hashed))?;
            manifest.insert(slashed(relative), slashed(&hashed));
        }

        let path = self.manifest_path();
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| StepError::Manifest(path.clone(), e))?;
        io::write(&path, json)?;

        tracing::info!(
            "{}: revved {} files {}",
            self.name,
            manifest.len(),
            as_overhead(s)
        );
        Ok(manifest)
    }

    fn rewrite_pages(&self) -> Result<usize, StepError> {
        let path = self.manifest_path();
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StepError::ManifestMismatch(self.name.clone(), path));
            }
            Err(e) => return Err(StepError::Io(path, e)),
        };
        let manifest: Manifest =
            serde_json::from_str(&json).map_err(|e| StepError::Manifest(path.clone(), e))?;

        let rewriter = Rewriter::new(&manifest)?;
        let mut total = 0;

        for page in io::expand(&self.target.page)? {
            let text = io::read_to_string(&page.path)?;
            let (text, count) = rewriter.apply(&text);
            tracing::debug!("{}: {count} references in {}", self.name, page.path);

            io::write(&self.target.page_build.join(page.relative()), text)?;
            total += count;
        }

        Ok(total)
    }
}

/// `<stem>.<hash>.<ext>`, or `<name>.<hash>` for files without an extension.
pub(crate) fn hashed_name(path: &Utf8Path, hash: Hash32) -> Utf8PathBuf {
    let short = hash.to_short();
    let name = match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!("{stem}.{short}.{ext}"),
        _ => format!("{}.{short}", path.file_name().unwrap_or_default()),
    };
    path.with_file_name(name)
}

fn slashed(path: &Utf8Path) -> String {
    path.components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Single pass literal replacement of manifest keys.
struct Rewriter<'a> {
    manifest: &'a Manifest,
    regex: Option<Regex>,
}

impl<'a> Rewriter<'a> {
    fn new(manifest: &'a Manifest) -> Result<Self, StepError> {
        if manifest.is_empty() {
            return Ok(Self {
                manifest,
                regex: None,
            });
        }

        // Longest first, so a key that is a suffix of another never wins.
        let mut keys: Vec<&String> = manifest.keys().collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

        let alternation = keys
            .into_iter()
            .map(|key| regex::escape(key))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            manifest,
            regex: Some(Regex::new(&alternation)?),
        })
    }

    fn apply(&self, text: &str) -> (String, usize) {
        let Some(regex) = &self.regex else {
            return (text.to_string(), 0);
        };

        let mut count = 0;
        let out = regex.replace_all(text, |caps: &regex::Captures| {
            count += 1;
            self.manifest[&caps[0]].clone()
        });

        (out.into_owned(), count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tests::{tmp, touch};

    fn group(root: &Utf8Path, name: &str, src: &str) -> Revision {
        Revision::new(
            name,
            Fingerprint {
                src: vec![root.join(src).to_string()],
                build: root.join("dist"),
                page: vec![root.join("dist/*.html").to_string()],
                page_build: root.join("dist"),
            },
        )
    }

    #[test]
    fn test_hashed_name() {
        let hash = Hash32::hash(b"");
        assert_eq!(
            hashed_name(Utf8Path::new("js/app.min.js"), hash),
            "js/app.min.af1349b9f5.js"
        );
        assert_eq!(hashed_name(Utf8Path::new("LICENSE"), hash), "LICENSE.af1349b9f5");
    }

    #[test]
    fn test_rev_is_idempotent() {
        let (_dir, root) = tmp();
        touch(&root.join("dist/a.js"), "console.log(1)");

        let first = group(&root, "app.script.md5", "dist/a.js").rev().unwrap();
        let second = group(&root, "app.script.md5", "dist/a.js").rev().unwrap();

        assert_eq!(first, second);
        let hashed = &first["a.js"];
        assert!(hashed.starts_with("a.") && hashed.ends_with(".js"));
        assert_eq!(
            std::fs::read_to_string(root.join("dist").join(hashed)).unwrap(),
            "console.log(1)"
        );
        assert!(root.join("dist/app.script.md5.rev.json").exists());
    }

    #[test]
    fn test_full_cycle() {
        let (_dir, root) = tmp();
        touch(&root.join("dist/a.js"), "a");
        touch(&root.join("dist/index.html"), r#"<script src="a.js"></script>"#);

        let group = group(&root, "app.script.md5", "dist/a.js");
        let manifest = group.rev().unwrap();
        assert_eq!(group.stage(), Stage::Revved);

        assert_eq!(group.replace().unwrap(), 1);
        assert_eq!(group.stage(), Stage::Replaced);

        group.clean().unwrap();
        assert_eq!(group.stage(), Stage::CleanedUp);
        assert!(!group.manifest_path().exists());
        assert!(root.join("dist").join(&manifest["a.js"]).exists());

        let html = std::fs::read_to_string(root.join("dist/index.html")).unwrap();
        assert_eq!(html, format!(r#"<script src="{}"></script>"#, manifest["a.js"]));
    }

    #[test]
    fn test_replace_from_manifest() {
        let (_dir, root) = tmp();
        touch(
            &root.join("dist/app.script.md5.rev.json"),
            r#"{ "a.js": "a.93fe1.js" }"#,
        );
        touch(
            &root.join("dist/index.html"),
            r#"<script src="assets/a.js"></script><script src="a.js"></script>"#,
        );

        let group = group(&root, "app.script.md5", "dist/a.js");
        *group.stage.lock().unwrap() = Stage::Revved;

        assert_eq!(group.replace().unwrap(), 2);

        let html = std::fs::read_to_string(root.join("dist/index.html")).unwrap();
        assert!(html.contains("assets/a.93fe1.js"));
        assert!(!html.replace("a.93fe1.js", "").contains("a.js"));
    }

    #[test]
    fn test_replace_longest_key_first() {
        let manifest = Manifest::from([
            ("a.js".to_string(), "a.1.js".to_string()),
            ("data.js".to_string(), "data.2.js".to_string()),
        ]);
        let rewriter = Rewriter::new(&manifest).unwrap();

        assert_eq!(
            rewriter.apply("data.js a.js a.js"),
            ("data.2.js a.1.js a.1.js".to_string(), 3)
        );
    }

    #[test]
    fn test_replace_without_manifest() {
        let (_dir, root) = tmp();
        let group = group(&root, "vendor.script.md5", "dist/vendor.js");
        *group.stage.lock().unwrap() = Stage::Revved;

        assert!(matches!(
            group.replace(),
            Err(StepError::ManifestMismatch(name, _)) if name == "vendor.script.md5"
        ));
        assert_eq!(group.stage(), Stage::Revved);
    }

    #[test]
    fn test_out_of_order() {
        let (_dir, root) = tmp();
        let group = group(&root, "app.style.md5", "dist/app.css");

        assert!(matches!(
            group.replace(),
            Err(StepError::OutOfOrder(_, StepKind::Replace, Stage::Pending))
        ));
        assert!(matches!(
            group.clean(),
            Err(StepError::OutOfOrder(_, StepKind::Cleanup, Stage::Pending))
        ));
    }

    #[test]
    fn test_clean_keeps_hashed_assets() {
        let (_dir, root) = tmp();
        touch(&root.join("dist/other.rev.json"), "{}");
        touch(&root.join("dist/app.af1349b9f5.css"), "");

        let group = group(&root, "app.style.md5", "dist/app.css");
        *group.stage.lock().unwrap() = Stage::Replaced;
        group.clean().unwrap();

        assert!(!root.join("dist/other.rev.json").exists());
        assert!(root.join("dist/app.af1349b9f5.css").exists());
    }
}
