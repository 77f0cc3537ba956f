//! Small filesystem helpers for the configuration directory

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

/// Outcome of a prefix cleanup
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, std::io::Error)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Replace the file at `path` with `content`
pub async fn write_file(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::write(path, content).await?;
    debug!("wrote {}", path.display());
    Ok(())
}

/// Read `path`; a missing file reads as empty
pub async fn read_file(path: impl AsRef<Path>) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e.into()),
    }
}

/// Delete every file in `dir` whose name starts with `prefix`.
///
/// Individual delete failures are logged and reported; only a failure to
/// list the directory is an error.
pub async fn remove_by_prefix(dir: impl AsRef<Path>, prefix: &str) -> Result<CleanupReport> {
    let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
    let mut report = CleanupReport::default();

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => report.removed.push(path),
            Err(e) => {
                warn!("failed to remove {}: {}", path.display(), e);
                report.failed.push((path, e));
            }
        }
    }

    debug!(
        "removed {} files with prefix '{}' ({} failed)",
        report.removed.len(),
        prefix,
        report.failed.len()
    );

    Ok(report)
}
