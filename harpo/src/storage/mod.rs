//! Storage providers.
//!
//! A [`StorageProvider`] stores and retrieves byte streams at slash-separated
//! object paths. Instances are built once per declared storage through
//! [`get_provider`], connection-tested with [`StorageProvider::test`], then
//! shared by every backup run.

mod local;
mod probe;
mod s3;

pub use local::LocalStorage;
pub use probe::{PROBE_CONTENT, PROBE_PATH, connectivity_probe};
pub use s3::S3Storage;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::provider::ProviderConfig;
use crate::{Error, Result};

pub const S3: &str = "S3";
pub const LOCAL: &str = "LOCAL";

/// Storage kinds understood by [`get_provider`].
pub const KNOWN_KINDS: &[&str] = &[S3, LOCAL];

/// Content type used when the caller has none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Owned reader handed to [`StorageProvider::upload`].
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Metadata about a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Symbolic kind of this provider (e.g. `"S3"`).
    fn kind(&self) -> &'static str;

    /// Check the storage is reachable and writable.
    async fn test(&self) -> Result<()>;

    /// Store everything `reader` yields at `path`.
    async fn upload(&self, path: &str, reader: BoxedReader, content_type: &str) -> Result<()>;

    /// Copy the object at `path` into `writer`.
    async fn download(&self, path: &str, writer: &mut (dyn AsyncWrite + Send + Unpin))
    -> Result<()>;

    async fn info(&self, path: &str) -> Result<FileInfo>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Delete several objects. Individual failures are not reported.
    async fn delete_many(&self, paths: &[String]) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build a storage provider. `kind` is case-sensitive.
///
/// Construction performs no I/O; call [`StorageProvider::test`] before
/// trusting the instance.
pub fn get_provider(kind: &str, config: &ProviderConfig) -> Result<Arc<dyn StorageProvider>> {
    let provider: Arc<dyn StorageProvider> = match kind {
        S3 => Arc::new(S3Storage::from_config(config)?),
        LOCAL => Arc::new(LocalStorage::from_config(config)?),
        other => return Err(Error::unsupported("storage", other)),
    };
    Ok(provider)
}
