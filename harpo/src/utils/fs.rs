//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` / parent-directory checks.

use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    ensure_dir_all_with_op("creating directory", parent).await
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Remove every immediate child of `dir`, keeping `dir` itself.
///
/// Listing failures are returned. Individual removal failures are logged and
/// do not stop the remaining removals; the number of children that could not
/// be removed is returned.
pub async fn clear_dir_contents(dir: &Path) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| io_error("listing", dir, e))?;

    let mut failures = 0;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Failed to read directory entry");
                failures += 1;
                break;
            }
        };

        let path = entry.path();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        let result = if is_dir {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };

        match result {
            Ok(()) => debug!(path = %path.display(), "Removed"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove entry");
                failures += 1;
            }
        }
    }

    Ok(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clear_dir_contents_keeps_dir() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::write(root.join("a.txt"), "a").unwrap();
        std::fs::create_dir_all(root.join("nested/deeper")).unwrap();
        std::fs::write(root.join("nested/deeper/b.txt"), "b").unwrap();

        let failures = clear_dir_contents(root).await.unwrap();

        assert_eq!(failures, 0);
        assert!(root.is_dir());
        assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_clear_dir_contents_missing_dir() {
        let temp = TempDir::new().unwrap();
        let err = clear_dir_contents(&temp.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IoPath { op: "listing", .. }));
    }

    #[tokio::test]
    async fn test_ensure_parent_dir() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a/b/c.bin");
        ensure_parent_dir(&file).await.unwrap();
        assert!(temp.path().join("a/b").is_dir());
    }
}
