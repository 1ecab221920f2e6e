use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::archiving::ArchiveKind;
use crate::backup::Schedule;
use crate::utils::filename::archive_object_path;
use crate::{Error, Result};

/// One configured backup unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderJob {
    /// Unique name, also used in tags and object paths.
    pub name: String,
    /// Directory to back up.
    pub path: PathBuf,
    /// Prefix of the uploaded object path.
    pub destination: String,
    /// Cron expression or `@every <duration>`.
    pub schedule: String,
    /// Archive kind selector; empty selects the default.
    #[serde(default)]
    pub archiver: String,
    /// Clear the folder contents once the uploads are done.
    #[serde(default)]
    pub remove: bool,
    /// Skip unreadable entries instead of failing the archive.
    #[serde(default)]
    pub ignore_archive_errors: bool,
    #[serde(default)]
    pub storages: Vec<String>,
    #[serde(default)]
    pub notifiers: Vec<String>,
}

impl FolderJob {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        destination: impl Into<String>,
        schedule: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            destination: destination.into(),
            schedule: schedule.into(),
            archiver: String::new(),
            remove: false,
            ignore_archive_errors: false,
            storages: Vec::new(),
            notifiers: Vec::new(),
        }
    }

    /// Archive kind selected by `archiver`, falling back to the default.
    pub fn archive_kind(&self) -> ArchiveKind {
        ArchiveKind::from_selector(&self.archiver).unwrap_or_default()
    }

    /// Remote path the folder's archive is uploaded to.
    pub fn object_path(&self) -> String {
        archive_object_path(&self.name, &self.destination, self.archive_kind().extension())
    }

    /// Checks that only need the folder itself.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("folder name must not be empty"));
        }
        let name = &self.name;

        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(Error::validation(format!(
                    "path {} of folder '{name}' is not a directory",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(Error::validation(format!(
                    "path {} of folder '{name}' is not accessible: {e}",
                    self.path.display()
                )));
            }
        }

        if self.destination.trim().is_empty() {
            return Err(Error::validation(format!(
                "destination of folder '{name}' must not be empty"
            )));
        }
        if self.schedule.trim().is_empty() {
            return Err(Error::validation(format!(
                "schedule of folder '{name}' must not be empty"
            )));
        }
        Schedule::parse(&self.schedule)?;

        let selector = self.archiver.trim();
        if !selector.is_empty() && ArchiveKind::from_selector(selector).is_none() {
            warn!(
                folder = %name,
                archiver = %selector,
                fallback = ArchiveKind::default().as_str(),
                "Unknown archiver, the default will be used"
            );
        }
        Ok(())
    }
}
