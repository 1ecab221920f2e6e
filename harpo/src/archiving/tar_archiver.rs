use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive as TarArchive, Builder as TarBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    ArchiveProvider, TAR, check_cancelled, entry_name, run_blocking, skip_or_fail, walk_source,
};
use crate::provider::{ProviderConfig, optional_str, optional_u32};
use crate::utils::fs::io_error;
use crate::{Error, Result};

pub(super) const DEFAULT_COMPRESSION: &str = "gz";
pub(super) const DEFAULT_LEVEL: u32 = 9;

/// Gzip-compressed tarballs.
pub struct TarArchiver {
    level: u32,
}

impl TarArchiver {
    pub fn new(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(Error::invalid_setting("level", "an integer between 0 and 9"));
        }
        Ok(Self { level })
    }

    /// Keys `compression` (only `gz`) and `level` (0..=9, default 9).
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let compression = optional_str(config, "compression")?.unwrap_or(DEFAULT_COMPRESSION);
        if !compression.eq_ignore_ascii_case(DEFAULT_COMPRESSION) {
            return Err(Error::invalid_setting("compression", "'gz'"));
        }
        Self::new(optional_u32(config, "level", DEFAULT_LEVEL)?)
    }
}

fn write_archive(
    token: &CancellationToken,
    src: &Path,
    dst: File,
    level: u32,
    ignore_errors: bool,
) -> Result<()> {
    let encoder = GzEncoder::new(BufWriter::new(dst), Compression::new(level));
    let mut tar = TarBuilder::new(encoder);

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
            tar.append_dir(&name, entry.path())
                .map_err(|e| io_error("adding", entry.path(), e))?;
            continue;
        }

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

        tar.append_file(&name, &mut file)
            .map_err(|e| io_error("adding", entry.path(), e))?;
    }

    let encoder = tar.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(())
}

fn extract_archive(
    token: &CancellationToken,
    src: File,
    dst: &Path,
    ignore_errors: bool,
) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| io_error("creating", dst, e))?;

    let mut archive = TarArchive::new(GzDecoder::new(BufReader::new(src)));
    let entries = archive
        .entries()
        .map_err(|e| Error::Archive(format!("tar: {e}")))?;

    for entry in entries {
        check_cancelled(token)?;

        let mut entry = entry.map_err(|e| Error::Archive(format!("tar: {e}")))?;
        let name = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        let result = match entry.unpack_in(dst) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::Archive(format!(
                "archive entry '{name}' escapes the destination"
            ))),
            Err(e) => Err(io_error("unpacking", &dst.join(&name), e)),
        };
        if let Err(e) = result {
            skip_or_fail(ignore_errors, &name, e)?;
        }
    }

    Ok(())
}

#[async_trait]
impl ArchiveProvider for TarArchiver {
    fn kind(&self) -> &'static str {
        TAR
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
        let level = self.level;
        run_blocking(move || write_archive(&token, &src, dst, level, ignore_errors)).await
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
        ".tar.gz"
    }
}
