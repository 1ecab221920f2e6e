//! Archival providers.
//!
//! An [`ArchiveProvider`] turns a source directory into a single archive file
//! and back. The blocking codecs run on the blocking thread pool and check the
//! cancellation token between entries.

mod tar_archiver;
mod zip_archiver;

pub use tar_archiver::TarArchiver;
pub use zip_archiver::ZipArchiver;

use std::fs::File;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use walkdir::WalkDir;

use crate::provider::ProviderConfig;
use crate::{Error, Result};

pub const ZIP: &str = "ZIP";
pub const TAR: &str = "TAR";

/// Archive kinds understood by [`get_provider`].
pub const KNOWN_KINDS: &[&str] = &[ZIP, TAR];

#[async_trait]
pub trait ArchiveProvider: Send + Sync {
    /// Symbolic kind of this provider (e.g. `"ZIP"`).
    fn kind(&self) -> &'static str;

    /// Write an archive of the contents of `src` into `dst`.
    ///
    /// Entry names are relative to `src`. With `ignore_errors`, entries that
    /// cannot be read are logged and left out instead of failing the archive.
    async fn archive(
        &self,
        token: &CancellationToken,
        src: &Path,
        dst: File,
        ignore_errors: bool,
    ) -> Result<()>;

    /// Unpack the archive read from `src` into the directory `dst`.
    async fn extract(
        &self,
        token: &CancellationToken,
        src: File,
        dst: &Path,
        ignore_errors: bool,
    ) -> Result<()>;

    /// Canonical file extension, with the leading dot.
    fn extension(&self) -> &'static str;
}

/// Build an archival provider. `kind` is case-sensitive.
pub fn get_provider(kind: &str, config: &ProviderConfig) -> Result<Arc<dyn ArchiveProvider>> {
    let provider: Arc<dyn ArchiveProvider> = match kind {
        ZIP => Arc::new(ZipArchiver::from_config(config)?),
        TAR => Arc::new(TarArchiver::from_config(config)?),
        other => return Err(Error::unsupported("archive", other)),
    };
    Ok(provider)
}

/// Archive kind selected by a folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveKind {
    #[default]
    Zip,
    Tar,
}

impl ArchiveKind {
    /// Match a folder's `archiver` selector, ignoring case.
    pub fn from_selector(selector: &str) -> Option<Self> {
        match selector.trim().to_ascii_uppercase().as_str() {
            ZIP => Some(Self::Zip),
            TAR => Some(Self::Tar),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zip => ZIP,
            Self::Tar => TAR,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::Tar => "application/gzip",
        }
    }

    /// File extension of archives of this kind, with the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::Tar => ".tar.gz",
        }
    }

    /// Provider settings used when a folder selects this kind.
    pub fn default_config(&self) -> ProviderConfig {
        let value = match self {
            Self::Zip => json!({ "method": zip_archiver::DEFAULT_METHOD }),
            Self::Tar => json!({
                "compression": tar_archiver::DEFAULT_COMPRESSION,
                "level": tar_archiver::DEFAULT_LEVEL,
            }),
        };
        match value {
            serde_json::Value::Object(map) => map,
            _ => ProviderConfig::new(),
        }
    }

    pub fn provider(&self) -> Result<Arc<dyn ArchiveProvider>> {
        get_provider(self.as_str(), &self.default_config())
    }
}

/// Entry name of `path` inside an archive of `root`, `/`-separated.
fn entry_name(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| Error::Archive(format!("{} is outside {}", path.display(), root.display())))?;

    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// Relative destination of an archive entry, rejecting absolute or escaping names.
fn sanitize_entry_path(name: &str) -> Result<PathBuf> {
    let normalized = name.replace('\\', "/");
    let mut sanitized = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(segment) => sanitized.push(segment),
            Component::CurDir => {}
            _ => {
                return Err(Error::Archive(format!(
                    "archive entry '{name}' contains invalid segments"
                )));
            }
        }
    }
    Ok(sanitized)
}

/// Walk the descendants of `root` in a stable order.
fn walk_source(root: &Path) -> walkdir::IntoIter {
    WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Either swallow a per-entry failure (logging it) or propagate it.
fn skip_or_fail(ignore_errors: bool, entry: &str, err: Error) -> Result<()> {
    if ignore_errors && !err.is_cancelled() {
        warn!(entry = %entry, error = %err, "Skipping archive entry");
        return Ok(());
    }
    Err(err)
}

/// Run a blocking codec job on the blocking pool.
async fn run_blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Archive(format!("archive task failed: {e}")))?
}
