//! Stage trait and the driver that runs stages in order.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::archive::ArchiveStage;
use super::cleanup::CleanupStage;
use super::context::{ExecutionContext, UploadOutcome};
use super::upload::UploadStage;

/// What the driver does after a stage returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFlow {
    Continue,
    Halt,
}

/// One step of a backup run.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut ExecutionContext) -> StageFlow;
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub folder: String,
    pub stages_run: Vec<&'static str>,
    pub halted_at: Option<&'static str>,
    pub uploads: Vec<UploadOutcome>,
    pub elapsed: Duration,
}

impl RunReport {
    /// Every stage ran and every upload succeeded.
    pub fn is_success(&self) -> bool {
        self.halted_at.is_none() && self.uploads.iter().all(UploadOutcome::is_success)
    }

    pub fn failed_uploads(&self) -> usize {
        self.uploads.iter().filter(|u| !u.is_success()).count()
    }
}

/// Ordered list of stages run by a fixed loop.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Archive, then upload, then cleanup.
    pub fn backup() -> Self {
        Self::new()
            .add_stage(ArchiveStage)
            .add_stage(UploadStage)
            .add_stage(CleanupStage)
    }

    /// Add a stage to the end of the pipeline.
    pub fn add_stage<S: Stage + 'static>(mut self, stage: S) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, stopping at the first one that halts.
    ///
    /// A local archive still present at the end is removed.
    pub async fn run(&self, ctx: &mut ExecutionContext) -> RunReport {
        let started = Instant::now();
        let mut stages_run = Vec::with_capacity(self.stages.len());
        let mut halted_at = None;

        for stage in &self.stages {
            debug!(folder = %ctx.folder_name(), stage = stage.name(), "Running stage");
            stages_run.push(stage.name());
            if stage.execute(ctx).await == StageFlow::Halt {
                halted_at = Some(stage.name());
                break;
            }
        }

        if let Some(artifact) = ctx.artifact.take()
            && let Err(e) = artifact.remove().await
        {
            warn!(folder = %ctx.folder_name(), error = %e, "Failed to remove local archive");
        }

        let report = RunReport {
            folder: ctx.folder.name.clone(),
            stages_run,
            halted_at,
            uploads: std::mem::take(&mut ctx.uploads),
            elapsed: started.elapsed(),
        };

        info!(
            folder = %report.folder,
            halted_at = ?report.halted_at,
            failed_uploads = report.failed_uploads(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Backup run finished"
        );
        report
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::backup()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};
    use std::sync::Arc;

    use crate::notification::MessageLevel;
    use crate::test_utils::{
        FailingStorage, MemoryStorage, RecordingNotifier, SlowStorage, bound_notifier,
        bound_storage, context, populated_folder,
    };

    fn zip_entries(data: &[u8]) -> Vec<(String, String)> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data)).unwrap();
        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).unwrap();
            let mut content = String::new();
            entry.read_to_string(&mut content).unwrap();
            entries.push((entry.name().to_string(), content));
        }
        entries.sort();
        entries
    }

    fn is_empty_dir(path: &std::path::Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    #[tokio::test]
    async fn test_backup_uploads_and_notifies() {
        let temp = tempfile::TempDir::new().unwrap();
        let work = temp.path().join("work");
        let storage = Arc::new(MemoryStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut folder = populated_folder(temp.path(), "docs");
        folder.archiver = "zip".into();

        let mut ctx = context(
            folder,
            vec![bound_storage("s3a", &storage)],
            vec![bound_notifier("slack1", &notifier)],
            &work,
        );
        let report = Pipeline::backup().run(&mut ctx).await;
        ctx.dispatcher.flush().await;

        assert!(report.is_success());
        assert_eq!(report.stages_run, vec!["archive", "upload", "cleanup"]);
        assert_eq!(storage.paths(), vec!["backups/docs/docs.harpo.zip"]);

        let entries = zip_entries(&storage.get("backups/docs/docs.harpo.zip").unwrap());
        assert!(entries.contains(&("a.txt".to_string(), "alpha".to_string())));
        assert!(entries.contains(&("nested/b.txt".to_string(), "bravo".to_string())));

        assert_eq!(notifier.count(MessageLevel::Success), 1);
        assert_eq!(notifier.count(MessageLevel::Error), 0);
        assert!(notifier.messages().iter().all(|m| m.extras == vec!["docs"]));
        assert!(temp.path().join("docs").join("a.txt").exists());
        assert!(is_empty_dir(&work));
    }

    #[tokio::test]
    async fn test_partial_upload_failure_is_isolated() {
        let temp = tempfile::TempDir::new().unwrap();
        let work = temp.path().join("work");
        let good = Arc::new(MemoryStorage::default());
        let other = Arc::new(MemoryStorage::default());
        let bad = Arc::new(FailingStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let mut ctx = context(
            populated_folder(temp.path(), "docs"),
            vec![
                bound_storage("good", &good),
                bound_storage("bad", &bad),
                bound_storage("other", &other),
            ],
            vec![bound_notifier("rec", &notifier)],
            &work,
        );
        let report = Pipeline::backup().run(&mut ctx).await;
        ctx.dispatcher.flush().await;

        assert_eq!(report.uploads.len(), 3);
        assert_eq!(report.failed_uploads(), 1);
        assert!(!report.is_success());
        assert_eq!(report.stages_run.last(), Some(&"cleanup"));
        assert_eq!(bad.attempts(), 1);
        assert_eq!(good.upload_count(), 1);
        assert_eq!(other.upload_count(), 1);

        let subjects = notifier.subjects();
        let uploaded = subjects
            .iter()
            .filter(|s| s.starts_with("Archive uploaded to storage"))
            .count();
        let failed = subjects
            .iter()
            .filter(|s| s.starts_with("Unable to upload archive"))
            .count();
        assert_eq!(uploaded, 2);
        assert_eq!(failed, 1);
        assert_eq!(notifier.count(MessageLevel::Success), 1);
        assert!(is_empty_dir(&work));
    }

    #[tokio::test]
    async fn test_artifact_removed_when_every_upload_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let work = temp.path().join("work");
        let bad = Arc::new(FailingStorage::default());

        let mut ctx = context(
            populated_folder(temp.path(), "docs"),
            vec![bound_storage("bad", &bad)],
            vec![],
            &work,
        );
        let report = Pipeline::backup().run(&mut ctx).await;

        assert_eq!(report.failed_uploads(), 1);
        assert!(ctx.artifact.is_none());
        assert!(is_empty_dir(&work));
    }

    #[tokio::test]
    async fn test_remove_clears_folder_after_success() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let mut folder = populated_folder(temp.path(), "docs");
        folder.remove = true;
        let source = folder.path.clone();

        let mut ctx = context(
            folder,
            vec![bound_storage("mem", &storage)],
            vec![],
            &temp.path().join("work"),
        );
        Pipeline::backup().run(&mut ctx).await;

        assert!(source.is_dir());
        assert!(is_empty_dir(&source));
    }

    #[tokio::test]
    async fn test_remove_clears_folder_even_when_upload_failed() {
        let temp = tempfile::TempDir::new().unwrap();
        let bad = Arc::new(FailingStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut folder = populated_folder(temp.path(), "docs");
        folder.remove = true;
        let source = folder.path.clone();

        let mut ctx = context(
            folder,
            vec![bound_storage("bad", &bad)],
            vec![bound_notifier("rec", &notifier)],
            &temp.path().join("work"),
        );
        Pipeline::backup().run(&mut ctx).await;
        ctx.dispatcher.flush().await;

        assert!(source.is_dir());
        assert!(is_empty_dir(&source));
        assert_eq!(notifier.count(MessageLevel::Warning), 0);
        assert_eq!(notifier.count(MessageLevel::Success), 1);
    }

    /// Deletes the source folder so cleanup cannot list it.
    struct DeleteSource;

    #[async_trait]
    impl Stage for DeleteSource {
        fn name(&self) -> &'static str {
            "delete-source"
        }

        async fn execute(&self, ctx: &mut ExecutionContext) -> StageFlow {
            std::fs::remove_dir_all(&ctx.folder.path).unwrap();
            StageFlow::Continue
        }
    }

    #[tokio::test]
    async fn test_unlistable_folder_reports_error_and_still_succeeds() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut folder = populated_folder(temp.path(), "docs");
        folder.remove = true;
        let work = temp.path().join("work");

        let mut ctx = context(
            folder,
            vec![bound_storage("mem", &storage)],
            vec![bound_notifier("rec", &notifier)],
            &work,
        );
        let report = Pipeline::new()
            .add_stage(ArchiveStage)
            .add_stage(UploadStage)
            .add_stage(DeleteSource)
            .add_stage(CleanupStage)
            .run(&mut ctx)
            .await;
        ctx.dispatcher.flush().await;

        assert_eq!(report.halted_at, None);
        assert_eq!(storage.upload_count(), 1);
        assert_eq!(notifier.count(MessageLevel::Error), 1);
        assert!(notifier.subjects().contains(&"Unable to read folder docs".to_string()));
        assert_eq!(notifier.count(MessageLevel::Success), 1);
        assert!(is_empty_dir(&work));
    }

    #[tokio::test]
    async fn test_upload_timeout_is_reported() {
        let temp = tempfile::TempDir::new().unwrap();
        let slow = Arc::new(SlowStorage {
            delay: std::time::Duration::from_secs(10),
        });
        let mut ctx = context(
            populated_folder(temp.path(), "docs"),
            vec![bound_storage("slow", &slow)],
            vec![],
            &temp.path().join("work"),
        );
        ctx.timeouts.upload = std::time::Duration::from_millis(50);

        let report = Pipeline::backup().run(&mut ctx).await;
        let error = report.uploads[0].error.as_deref().unwrap();
        assert!(error.contains("timed out"));
        assert_eq!(report.stages_run.last(), Some(&"cleanup"));
    }

    #[tokio::test]
    async fn test_upload_without_artifact_halts() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let mut ctx = context(
            populated_folder(temp.path(), "docs"),
            vec![bound_storage("mem", &storage)],
            vec![bound_notifier("rec", &notifier)],
            temp.path(),
        );

        let report = Pipeline::new()
            .add_stage(UploadStage)
            .add_stage(CleanupStage)
            .run(&mut ctx)
            .await;
        ctx.dispatcher.flush().await;

        assert_eq!(report.halted_at, Some("upload"));
        assert_eq!(storage.upload_count(), 0);
        assert_eq!(notifier.count(MessageLevel::Error), 1);
        assert_eq!(notifier.count(MessageLevel::Success), 0);
    }

    #[tokio::test]
    async fn test_repeated_runs_produce_equivalent_archives() {
        let temp = tempfile::TempDir::new().unwrap();
        let folder = populated_folder(temp.path(), "docs");
        let pipeline = Pipeline::backup();

        let mut archives = Vec::new();
        for _ in 0..2 {
            let storage = Arc::new(MemoryStorage::default());
            let mut ctx = context(
                folder.clone(),
                vec![bound_storage("mem", &storage)],
                vec![],
                &temp.path().join("work"),
            );
            pipeline.run(&mut ctx).await;
            archives.push(zip_entries(&storage.get("backups/docs/docs.harpo.zip").unwrap()));
        }

        assert_eq!(archives[0], archives[1]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_entry_aborts_before_upload() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let folder = populated_folder(temp.path(), "docs");
        std::os::unix::fs::symlink(temp.path().join("missing"), folder.path.join("dangling"))
            .unwrap();
        let work = temp.path().join("work");

        let mut ctx = context(
            folder,
            vec![bound_storage("mem", &storage)],
            vec![bound_notifier("rec", &notifier)],
            &work,
        );
        let report = Pipeline::backup().run(&mut ctx).await;
        ctx.dispatcher.flush().await;

        assert_eq!(report.halted_at, Some("archive"));
        assert_eq!(storage.upload_count(), 0);
        assert_eq!(notifier.count(MessageLevel::Error), 1);
        assert_eq!(notifier.count(MessageLevel::Success), 0);
        assert!(notifier.subjects().contains(&"Unable to archive folder docs".to_string()));
        assert!(is_empty_dir(&work));
    }

    #[tokio::test]
    async fn test_unknown_archiver_falls_back_to_zip() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let mut folder = populated_folder(temp.path(), "docs");
        folder.archiver = "RAR".into();

        let mut ctx = context(
            folder,
            vec![bound_storage("mem", &storage)],
            vec![],
            &temp.path().join("work"),
        );
        let report = Pipeline::backup().run(&mut ctx).await;

        assert!(report.is_success());
        assert_eq!(storage.paths(), vec!["backups/docs/docs.harpo.zip"]);
    }

    #[tokio::test]
    async fn test_tar_archiver_uses_full_extension() {
        let temp = tempfile::TempDir::new().unwrap();
        let storage = Arc::new(MemoryStorage::default());
        let mut folder = populated_folder(temp.path(), "Docs Folder");
        folder.archiver = "TAR".into();

        let mut ctx = context(
            folder,
            vec![bound_storage("mem", &storage)],
            vec![],
            &temp.path().join("work"),
        );
        Pipeline::backup().run(&mut ctx).await;

        assert_eq!(storage.paths(), vec!["backups/Docs Folder/docs-folder.harpo.tar.gz"]);
    }
}
