//! Configuration file model.
//!
//! ```yaml
//! folders:
//!   - name: docs
//!     path: ./docs
//!     destination: backups/docs
//!     schedule: "0 3 * * *"
//!     archiver: ZIP
//!     storages: [s3a]
//!     notifiers: [slack1]
//! storages:
//!   s3a:
//!     type: S3
//!     settings: { bucket: my-bucket, region: eu-west-1 }
//! notifiers:
//!   slack1:
//!     type: SLACK
//!     settings: { webhook_url: "https://hooks.slack.com/services/..." }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::FolderJob;
use crate::notification::{self, NotificationProvider};
use crate::provider::ProviderConfig;
use crate::storage::{self, StorageProvider};
use crate::utils::fs::io_error;
use crate::{Error, Result};

/// A named provider declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecl {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: ProviderConfig,
}

impl ProviderDecl {
    /// Registry kind; the file may use any case.
    pub fn registry_kind(&self) -> String {
        self.kind.trim().to_uppercase()
    }
}

/// Engine limits and paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound of a whole run, in seconds
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_archive_timeout")]
    pub archive_timeout_secs: u64,
    /// Per storage upload limit, in seconds
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_storage_test_timeout")]
    pub storage_test_timeout_secs: u64,
    /// Where archives are written before upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

fn default_run_timeout() -> u64 {
    2 * 60 * 60
}

fn default_archive_timeout() -> u64 {
    30 * 60
}

fn default_upload_timeout() -> u64 {
    90 * 60
}

fn default_storage_test_timeout() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: default_run_timeout(),
            archive_timeout_secs: default_archive_timeout(),
            upload_timeout_secs: default_upload_timeout(),
            storage_test_timeout_secs: default_storage_test_timeout(),
            work_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    pub fn storage_test_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_test_timeout_secs)
    }

    /// Configured work directory, or `harpo` under the system temp dir.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("harpo"))
    }
}

/// Whole configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub folders: Vec<FolderJob>,
    #[serde(default)]
    pub storages: BTreeMap<String, ProviderDecl>,
    #[serde(default)]
    pub notifiers: BTreeMap<String, ProviderDecl>,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| io_error("reading", path, e))?;
        let settings = Self::from_yaml_str(&raw)?;
        debug!(
            path = %path.display(),
            folders = settings.folders.len(),
            storages = settings.storages.len(),
            notifiers = settings.notifiers.len(),
            "Configuration loaded"
        );
        Ok(settings)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn folder(&self, name: &str) -> Option<&FolderJob> {
        self.folders.iter().find(|f| f.name == name)
    }

    /// Structural checks over the whole file. Providers are not contacted.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut targets: HashMap<(&str, String), &str> = HashMap::new();
        for folder in &self.folders {
            folder.validate()?;
            if !names.insert(folder.name.as_str()) {
                return Err(Error::validation(format!(
                    "folder name '{}' is used more than once",
                    folder.name
                )));
            }

            let object_path = folder.object_path();
            for storage in &folder.storages {
                let key = (storage.as_str(), object_path.clone());
                let Some(other) = targets.insert(key, folder.name.as_str()) else {
                    continue;
                };
                if other != folder.name {
                    return Err(Error::validation(format!(
                        "folders '{other}' and '{}' would both upload to '{object_path}' \
                         on storage '{storage}'",
                        folder.name
                    )));
                }
            }

            for storage in &folder.storages {
                if !self.storages.contains_key(storage) {
                    return Err(Error::validation(format!(
                        "folder '{}' references undeclared storage '{storage}'",
                        folder.name
                    )));
                }
            }
            for notifier in &folder.notifiers {
                if !self.notifiers.contains_key(notifier) {
                    return Err(Error::validation(format!(
                        "folder '{}' references undeclared notifier '{notifier}'",
                        folder.name
                    )));
                }
            }
        }

        for (name, decl) in &self.storages {
            if !storage::KNOWN_KINDS.contains(&decl.registry_kind().as_str()) {
                return Err(Error::validation(format!(
                    "storage '{name}' has unsupported type '{}'",
                    decl.kind
                )));
            }
        }
        for (name, decl) in &self.notifiers {
            if !notification::KNOWN_KINDS.contains(&decl.registry_kind().as_str()) {
                return Err(Error::validation(format!(
                    "notifier '{name}' has unsupported type '{}'",
                    decl.kind
                )));
            }
        }

        if self.engine.run_timeout_secs == 0
            || self.engine.archive_timeout_secs == 0
            || self.engine.upload_timeout_secs == 0
        {
            return Err(Error::validation("engine timeouts must be greater than zero"));
        }
        Ok(())
    }

    /// Construct every declared storage and run its connectivity test.
    pub async fn build_storages(&self) -> Result<HashMap<String, Arc<dyn StorageProvider>>> {
        let limit = self.engine.storage_test_timeout();
        let mut built = HashMap::with_capacity(self.storages.len());

        for (name, decl) in &self.storages {
            let provider = storage::get_provider(&decl.registry_kind(), &decl.settings)
                .map_err(|e| Error::config(format!("storage '{name}': {e}")))?;

            match tokio::time::timeout(limit, provider.test()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    return Err(Error::config(format!("storage '{name}' failed its test: {e}")));
                }
                Err(_) => {
                    let e = Error::timeout(format!("connectivity test of storage {name}"), limit);
                    return Err(Error::config(e.to_string()));
                }
            }

            info!(storage = %name, kind = provider.kind(), "Storage ready");
            built.insert(name.clone(), provider);
        }
        Ok(built)
    }

    pub fn build_notifiers(&self) -> Result<HashMap<String, Arc<dyn NotificationProvider>>> {
        self.notifiers
            .iter()
            .map(|(name, decl)| {
                let provider = notification::get_provider(&decl.registry_kind(), &decl.settings)
                    .map_err(|e| Error::config(format!("notifier '{name}': {e}")))?;
                debug!(notifier = %name, kind = provider.kind(), "Notifier ready");
                Ok((name.clone(), provider))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(dir: &Path) -> String {
        format!(
            r#"
folders:
  - name: docs
    path: {path}
    destination: backups/docs
    schedule: "@every 1h"
    archiver: zip
    storages: [disk]
    notifiers: [chat]
storages:
  disk:
    type: local
    settings:
      root: {root}
notifiers:
  chat:
    type: SLACK
    settings:
      webhook_url: https://hooks.slack.com/services/T/B/X
engine:
  upload_timeout_secs: 60
"#,
            path = dir.join("docs").display(),
            root = dir.join("store").display(),
        )
    }

    fn fixture() -> (tempfile::TempDir, Settings) {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(temp.path().join("docs")).unwrap();
        let settings = Settings::from_yaml_str(&yaml(temp.path())).unwrap();
        (temp, settings)
    }

    #[test]
    fn test_parse_applies_defaults() {
        let (_temp, settings) = fixture();
        let folder = settings.folder("docs").unwrap();
        assert!(!folder.remove);
        assert!(!folder.ignore_archive_errors);
        assert_eq!(folder.storages, vec!["disk"]);
        assert_eq!(settings.storages["disk"].registry_kind(), "LOCAL");
        assert_eq!(settings.engine.upload_timeout(), Duration::from_secs(60));
        assert_eq!(settings.engine.run_timeout(), Duration::from_secs(7200));
        assert_eq!(settings.engine.archive_timeout(), Duration::from_secs(1800));
        assert!(settings.engine.work_dir().ends_with("harpo"));
    }

    #[test]
    fn test_validate_ok() {
        let (_temp, settings) = fixture();
        settings.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_undeclared_storage() {
        let (_temp, mut settings) = fixture();
        settings.folders[0].storages = vec!["bad-storage-name".into()];
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("bad-storage-name"));
    }

    #[test]
    fn test_validate_rejects_undeclared_notifier() {
        let (_temp, mut settings) = fixture();
        settings.folders[0].notifiers.push("pager".into());
        assert!(settings.validate().unwrap_err().to_string().contains("pager"));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let (_temp, mut settings) = fixture();
        let copy = settings.folders[0].clone();
        settings.folders.push(copy);
        assert!(settings.validate().unwrap_err().to_string().contains("more than once"));
    }

    #[test]
    fn test_validate_rejects_colliding_object_paths() {
        let (_temp, mut settings) = fixture();
        let mut photos = settings.folders[0].clone();
        photos.name = "Фото".into();
        photos.destination = "backups".into();
        let mut documents = photos.clone();
        documents.name = "Документы".into();
        settings.folders.push(photos);
        settings.folders.push(documents);
        settings.validate().unwrap();

        let mut twin = settings.folders[0].clone();
        twin.name = "DOCS".into();
        settings.folders.push(twin);
        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("'docs' and 'DOCS'"), "{err}");
        assert!(err.contains("backups/docs/docs.harpo.zip"), "{err}");

        settings.folders.pop();
        let mut elsewhere = settings.folders[0].clone();
        elsewhere.name = "DOCS".into();
        elsewhere.storages.clear();
        settings.folders.push(elsewhere);
        settings.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_provider_type() {
        let (_temp, mut settings) = fixture();
        settings.storages.get_mut("disk").unwrap().kind = "FTP".into();
        assert!(settings.validate().unwrap_err().to_string().contains("FTP"));
    }

    #[tokio::test]
    async fn test_build_providers() {
        let (temp, settings) = fixture();
        let storages = settings.build_storages().await.unwrap();
        assert_eq!(storages["disk"].kind(), "LOCAL");
        assert!(!temp.path().join("store").join("harpo.test").exists());

        let notifiers = settings.build_notifiers().unwrap();
        assert_eq!(notifiers["chat"].kind(), "SLACK");
    }

    #[tokio::test]
    async fn test_build_storages_reports_bad_settings() {
        let (_temp, mut settings) = fixture();
        settings.storages.get_mut("disk").unwrap().settings.clear();
        let err = settings.build_storages().await.err().expect("expected build_storages to fail");
        assert!(err.to_string().contains("'root'"));
    }
}
