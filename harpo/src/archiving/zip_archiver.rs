use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{
    ArchiveProvider, ZIP, check_cancelled, entry_name, run_blocking, sanitize_entry_path,
    skip_or_fail, walk_source,
};
use crate::provider::{ProviderConfig, optional_str};
use crate::utils::fs::io_error;
use crate::{Error, Result};

pub(super) const DEFAULT_METHOD: &str = "deflate";

fn zip_error(err: zip::result::ZipError) -> Error {
    Error::Archive(format!("zip: {err}"))
}

/// ZIP archives, deflated or stored.
pub struct ZipArchiver {
    method: CompressionMethod,
}

impl ZipArchiver {
    pub fn new(method: CompressionMethod) -> Self {
        Self { method }
    }

    /// Key `method`: `deflate` (default) or `store`.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let method = match optional_str(config, "method")?
            .unwrap_or(DEFAULT_METHOD)
            .to_ascii_lowercase()
            .as_str()
        {
            "deflate" => CompressionMethod::Deflated,
            "store" => CompressionMethod::Stored,
            _ => return Err(Error::invalid_setting("method", "'deflate' or 'store'")),
        };
        Ok(Self::new(method))
    }
}

fn write_archive(
    token: &CancellationToken,
    src: &Path,
    dst: File,
    method: CompressionMethod,
    ignore_errors: bool,
) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(dst));
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .large_file(true);

    for entry in walk_source(src) {
        check_cancelled(token)?;

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                skip_or_fail(
                    ignore_errors,
                    &path.display().to_string(),
                    Error::Archive(format!("failed to walk {}: {e}", path.display())),
                )?;
                continue;
            }
        };

        let name = entry_name(src, entry.path())?;
        if entry.file_type().is_dir() {
            zip.add_directory(name.as_str(), options).map_err(zip_error)?;
            continue;
        }

        // Opened before the entry is started so a skipped file leaves no trace.
        let mut file = match File::open(entry.path()) {
            Ok(file) => file,
            Err(e) => {
                skip_or_fail(ignore_errors, &name, io_error("opening", entry.path(), e))?;
                continue;
            }
        };
        if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
            debug!(entry = %name, "Skipping symlinked directory");
            continue;
        }

        zip.start_file(name.as_str(), options).map_err(zip_error)?;
        io::copy(&mut file, &mut zip).map_err(|e| io_error("reading", entry.path(), e))?;
    }

    let mut writer = zip.finish().map_err(zip_error)?;
    writer.flush()?;
    Ok(())
}

fn extract_archive(
    token: &CancellationToken,
    src: File,
    dst: &Path,
    ignore_errors: bool,
) -> Result<()> {
    let mut archive = ZipArchive::new(src).map_err(zip_error)?;
    std::fs::create_dir_all(dst).map_err(|e| io_error("creating", dst, e))?;

    for index in 0..archive.len() {
        check_cancelled(token)?;

        let mut entry = archive.by_index(index).map_err(zip_error)?;
        let name = entry.name().to_string();

        let result = (|| -> Result<()> {
            let destination = dst.join(sanitize_entry_path(&name)?);
            if entry.is_dir() {
                return std::fs::create_dir_all(&destination)
                    .map_err(|e| io_error("creating", &destination, e));
            }
            if let Some(parent) = destination.parent() {
                std::fs::create_dir_all(parent).map_err(|e| io_error("creating", parent, e))?;
            }
            let mut output =
                File::create(&destination).map_err(|e| io_error("creating", &destination, e))?;
            io::copy(&mut entry, &mut output).map_err(|e| io_error("writing", &destination, e))?;
            Ok(())
        })();

        if let Err(e) = result {
            skip_or_fail(ignore_errors, &name, e)?;
        }
    }

    Ok(())
}

#[async_trait]
impl ArchiveProvider for ZipArchiver {
    fn kind(&self) -> &'static str {
        ZIP
    }

    async fn archive(
        &self,
        token: &CancellationToken,
        src: &Path,
        dst: File,
        ignore_errors: bool,
    ) -> Result<()> {
        let token = token.clone();
        let src: PathBuf = src.to_path_buf();
        let method = self.method;
        run_blocking(move || write_archive(&token, &src, dst, method, ignore_errors)).await
    }

    async fn extract(
        &self,
        token: &CancellationToken,
        src: File,
        dst: &Path,
        ignore_errors: bool,
    ) -> Result<()> {
        let token = token.clone();
        let dst = dst.to_path_buf();
        run_blocking(move || extract_archive(&token, src, &dst, ignore_errors)).await
    }

    fn extension(&self) -> &'static str {
        ".zip"
    }
}
