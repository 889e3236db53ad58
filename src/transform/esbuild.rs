use std::io::Write;
use std::process::{Command, Stdio};

use camino::{Utf8Path, Utf8PathBuf};

use crate::descriptor::Bundle;
use crate::error::TransformError;

pub(super) fn bundle(
    esbuild: &Utf8Path,
    entries: &[Utf8PathBuf],
    bundle: &Bundle,
    production: bool,
) -> Result<(), TransformError> {
    if entries.is_empty() {
        tracing::debug!("no entry points for {}, skipping bundler", bundle.build);
        return Ok(());
    }

    let mut cmd = Command::new(esbuild);
    cmd.args(entries.iter().map(|entry| entry.as_str()))
        .arg("--bundle")
        .arg("--format=esm")
        .arg("--log-level=warning");

    match &bundle.file {
        Some(file) if entries.len() == 1 => cmd.arg(format!("--outfile={}", bundle.build.join(file))),
        _ => cmd.arg(format!("--outdir={}", bundle.build)),
    };

    if production {
        cmd.arg("--minify");
    } else {
        cmd.arg("--sourcemap");
    }

    let output = cmd
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()?;

    if !output.status.success() {
        return Err(TransformError::Esbuild(String::from_utf8(output.stderr)?));
    }

    Ok(())
}

/// Minify a single source text by piping it through esbuild.
pub(super) fn minify(esbuild: &Utf8Path, text: &str, loader: &str) -> Result<String, TransformError> {
    let mut child = Command::new(esbuild)
        .arg("--minify")
        .arg(format!("--loader={loader}"))
        .arg("--log-level=warning")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // esbuild reads the whole input before writing anything, dropping stdin
    // closes it and lets the process finish.
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes())?;
    }

    let output = child.wait_with_output()?;

    if !output.status.success() {
        return Err(TransformError::Esbuild(String::from_utf8(output.stderr)?));
    }

    Ok(String::from_utf8(output.stdout)?)
}
