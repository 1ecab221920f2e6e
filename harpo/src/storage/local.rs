//! Filesystem-backed storage.
//!
//! Object paths are resolved below a configured root directory. Uploads are
//! written to a temporary sibling first and renamed into place, so readers
//! never observe a partially written object.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BoxedReader, FileInfo, LOCAL, StorageProvider, connectivity_probe};
use crate::provider::{ProviderConfig, required_str};
use crate::utils::fs::{ensure_parent_dir, io_error};
use crate::{Error, Result};

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::new(required_str(config, "root")?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object path onto the filesystem, refusing to leave the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let normalized = path.replace('\\', "/");
        let mut resolved = self.root.clone();
        let mut depth = 0;

        for component in Path::new(&normalized).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(Error::Storage(format!(
                        "object path '{path}' escapes the storage root"
                    )));
                }
            }
        }

        if depth == 0 {
            return Err(Error::Storage(format!("invalid object path '{path}'")));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn kind(&self) -> &'static str {
        LOCAL
    }

    async fn test(&self) -> Result<()> {
        connectivity_probe(self).await
    }

    async fn upload(&self, path: &str, mut reader: BoxedReader, _content_type: &str) -> Result<()> {
        let target = self.resolve(path)?;
        ensure_parent_dir(&target).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let partial =
            target.with_file_name(format!(".{file_name}.{}.part", Uuid::new_v4().simple()));

        let write = async {
            let mut file = tokio::fs::File::create(&partial)
                .await
                .map_err(|e| io_error("creating", &partial, e))?;
            tokio::io::copy(&mut reader, &mut file)
                .await
                .map_err(|e| io_error("writing", &partial, e))?;
            file.sync_all()
                .await
                .map_err(|e| io_error("syncing", &partial, e))?;
            tokio::fs::rename(&partial, &target)
                .await
                .map_err(|e| io_error("renaming", &partial, e))
        };

        if let Err(e) = write.await {
            if let Err(remove_err) = tokio::fs::remove_file(&partial).await
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(
                    path = %partial.display(),
                    error = %remove_err,
                    "Failed to remove partial upload"
                );
            }
            return Err(e);
        }

        debug!(path = %target.display(), "Stored object");
        Ok(())
    }

    async fn download(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let source = self.resolve(path)?;
        let mut file = tokio::fs::File::open(&source)
            .await
            .map_err(|e| io_error("opening", &source, e))?;
        tokio::io::copy(&mut file, &mut *writer)
            .await
            .map_err(|e| io_error("reading", &source, e))?;
        writer.flush().await?;
        Ok(())
    }

    async fn info(&self, path: &str) -> Result<FileInfo> {
        let source = self.resolve(path)?;
        let metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| io_error("reading metadata of", &source, e))?;
        if !metadata.is_file() {
            return Err(Error::Storage(format!("'{path}' is not an object")));
        }
        Ok(FileInfo {
            size: metadata.len(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| io_error("removing", &target, e))
    }

    async fn delete_many(&self, paths: &[String]) -> Result<()> {
        for path in paths {
            if let Err(e) = self.delete(path).await {
                debug!(path = %path, error = %e, "Failed to delete object");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{PROBE_PATH, StorageProvider};
    use tempfile::TempDir;

    fn reader(data: &'static [u8]) -> BoxedReader {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_upload_download_info_delete() {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp.path());

        storage
            .upload("backups/docs/docs.harpo.zip", reader(b"archive"), "application/zip")
            .await
            .unwrap();
        assert!(temp.path().join("backups/docs/docs.harpo.zip").is_file());

        let mut out = Vec::new();
        storage
            .download("backups/docs/docs.harpo.zip", &mut out)
            .await
            .unwrap();
        assert_eq!(out, b"archive");

        let info = storage.info("backups/docs/docs.harpo.zip").await.unwrap();
        assert_eq!(info.size, 7);

        storage.delete("backups/docs/docs.harpo.zip").await.unwrap();
        assert!(storage.info("backups/docs/docs.harpo.zip").await.is_err());
    }

    #[tokio::test]
    async fn test_upload_leaves_no_partial_files() {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp.path());

        storage.upload("a.bin", reader(b"1"), "").await.unwrap();
        storage.upload("a.bin", reader(b"22"), "").await.unwrap();

        let names: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.bin")]);
        assert_eq!(std::fs::read(temp.path().join("a.bin")).unwrap(), b"22");
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let storage = LocalStorage::new("/srv/harpo");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("backups/../../x").is_err());
        assert!(storage.resolve("").is_err());
        assert_eq!(
            storage.resolve("/backups/./db.zip").unwrap(),
            PathBuf::from("/srv/harpo/backups/db.zip")
        );
    }

    #[tokio::test]
    async fn test_delete_many_ignores_missing() {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp.path());
        storage.upload("x", reader(b"x"), "").await.unwrap();

        storage
            .delete_many(&["x".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(!temp.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_connectivity_probe_cleans_up() {
        let temp = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp.path());

        storage.test().await.unwrap();
        assert!(!temp.path().join(PROBE_PATH).exists());
    }
}
