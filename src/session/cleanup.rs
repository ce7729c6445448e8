//! Filesystem steps around a session: preparing the output location and the terminal cleanup.

use std::path::Path;

use anyhow::Context as _;

use crate::foundation::error::MuxResult;
use crate::sink::sidecar_prefix;

pub fn ensure_parent_dir(path: &Path) -> MuxResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Remove any previous file at `output` and make sure its directory exists.
pub fn prepare_output(output: &Path) -> MuxResult<()> {
    match std::fs::remove_file(output) {
        Ok(()) => tracing::debug!(output = %output.display(), "removed previous output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(anyhow::Error::new(err)
                .context(format!("failed to remove existing output '{}'", output.display()))
                .into());
        }
    }
    ensure_parent_dir(output)
}

/// Delete a partial output. Returns whether a file was removed.
pub fn remove_output(output: &Path) -> bool {
    match std::fs::remove_file(output) {
        Ok(()) => true,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => {
            tracing::warn!(output = %output.display(), error = %err, "failed to remove partial output");
            false
        }
    }
}

/// Delete every file next to `output` whose name starts with `"<output name>.sb-"`.
///
/// Returns how many files were removed; failures are logged and skipped.
pub fn sweep_sidecars(output: &Path) -> usize {
    let Some(prefix) = sidecar_prefix(output) else {
        return 0;
    };
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot list output directory for sidecar sweep");
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with(&prefix) {
            continue;
        }
        let path = entry.path();
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "failed to remove sidecar"),
        }
    }
    removed
}
