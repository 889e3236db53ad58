//! Adapters around the tools that actually transform sources.
//!
//! The pipeline only ever talks to the [`Transform`] trait. [`Toolchain`] is
//! the stock implementation: esbuild for bundling and script minification,
//! grass for stylesheets and a small regex based markup minifier.

mod esbuild;
mod markup;

use camino::Utf8PathBuf;

use crate::descriptor::Bundle;
use crate::error::TransformError;

pub use markup::minify as minify_markup;

/// Opaque source transforms. Every method blocks until the tool is done and
/// any error is fatal for the step that called it.
pub trait Transform: Send + Sync {
    /// Bundle the resolved entry points into `bundle.build`. The bundler owns
    /// its output directory, the pipeline never cleans it.
    fn bundle(
        &self,
        entries: &[Utf8PathBuf],
        bundle: &Bundle,
        production: bool,
    ) -> Result<(), TransformError>;

    /// Compile stylesheets to plain CSS, concatenated in the given order.
    fn compile_style(&self, sources: &[Utf8PathBuf]) -> Result<String, TransformError>;

    fn minify_script(&self, text: &str) -> Result<String, TransformError>;

    fn minify_style(&self, text: &str) -> Result<String, TransformError>;

    fn minify_markup(&self, text: &str) -> Result<String, TransformError>;
}

/// Default transforms backed by esbuild and grass.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Name or path of the esbuild executable.
    pub esbuild: Utf8PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            esbuild: Utf8PathBuf::from("esbuild"),
        }
    }
}

impl Transform for Toolchain {
    fn bundle(
        &self,
        entries: &[Utf8PathBuf],
        bundle: &Bundle,
        production: bool,
    ) -> Result<(), TransformError> {
        esbuild::bundle(&self.esbuild, entries, bundle, production)
    }

    #[cfg(feature = "styles")]
    fn compile_style(&self, sources: &[Utf8PathBuf]) -> Result<String, TransformError> {
        let options = grass::Options::default();
        let mut compiled = Vec::with_capacity(sources.len());

        for path in sources {
            tracing::debug!("compiling stylesheet {path}");
            compiled.push(grass::from_path(path, &options)?);
        }

        Ok(compiled.join("\n"))
    }

    #[cfg(not(feature = "styles"))]
    fn compile_style(&self, _: &[Utf8PathBuf]) -> Result<String, TransformError> {
        Err(TransformError::StylesDisabled)
    }

    fn minify_script(&self, text: &str) -> Result<String, TransformError> {
        esbuild::minify(&self.esbuild, text, "js")
    }

    #[cfg(feature = "styles")]
    fn minify_style(&self, text: &str) -> Result<String, TransformError> {
        let options = grass::Options::default().style(grass::OutputStyle::Compressed);
        Ok(grass::from_string(text, &options)?)
    }

    #[cfg(not(feature = "styles"))]
    fn minify_style(&self, text: &str) -> Result<String, TransformError> {
        esbuild::minify(&self.esbuild, text, "css")
    }

    fn minify_markup(&self, text: &str) -> Result<String, TransformError> {
        Ok(markup::minify(text))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Transform double which records every call and does trivial, easily
    /// recognizable work instead of running real tools.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    impl Transform for Recorder {
        fn bundle(
            &self,
            entries: &[Utf8PathBuf],
            bundle: &Bundle,
            production: bool,
        ) -> Result<(), TransformError> {
            self.record(format!("bundle({}, {production})", entries.len()));

            let mut out = String::new();
            for entry in entries {
                out.push_str(&std::fs::read_to_string(entry)?);
            }

            let file = bundle.file.as_deref().unwrap_or("bundle.js");
            std::fs::create_dir_all(&bundle.build)?;
            std::fs::write(bundle.build.join(file), out)?;
            Ok(())
        }

        fn compile_style(&self, sources: &[Utf8PathBuf]) -> Result<String, TransformError> {
            self.record(format!("compile_style({})", sources.len()));

            let mut out = Vec::new();
            for path in sources {
                out.push(format!("/* {} */", path.file_name().unwrap_or_default()));
                out.push(std::fs::read_to_string(path)?);
            }
            Ok(out.join("\n"))
        }

        fn minify_script(&self, text: &str) -> Result<String, TransformError> {
            self.record("minify_script");
            Ok(text.split_whitespace().collect())
        }

        fn minify_style(&self, text: &str) -> Result<String, TransformError> {
            self.record("minify_style");
            Ok(text.split_whitespace().collect())
        }

        fn minify_markup(&self, text: &str) -> Result<String, TransformError> {
            self.record("minify_markup");
            Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
        }
    }

    /// Transform double whose every call fails.
    pub(crate) struct Broken;

    impl Transform for Broken {
        fn bundle(&self, _: &[Utf8PathBuf], _: &Bundle, _: bool) -> Result<(), TransformError> {
            Err(TransformError::Esbuild("bundler exploded".into()))
        }

        fn compile_style(&self, _: &[Utf8PathBuf]) -> Result<String, TransformError> {
            Err(TransformError::Esbuild("compiler exploded".into()))
        }

        fn minify_script(&self, _: &str) -> Result<String, TransformError> {
            Err(TransformError::Esbuild("minifier exploded".into()))
        }

        fn minify_style(&self, _: &str) -> Result<String, TransformError> {
            Err(TransformError::Esbuild("minifier exploded".into()))
        }

        fn minify_markup(&self, _: &str) -> Result<String, TransformError> {
            Err(TransformError::Esbuild("minifier exploded".into()))
        }
    }
}
