//! Per-run state shared by the pipeline stages.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ENTITY;
use crate::config::FolderJob;
use crate::notification::{Dispatcher, Message, MessageLevel, NotificationProvider};
use crate::provider::Bound;
use crate::storage::StorageProvider;
use crate::{Error, Result};

/// Cancellation signal plus an absolute expiry.
///
/// Nested operations are bounded by their own limit, clamped to whatever is
/// left of the enclosing deadline.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    expires_at: Instant,
}

impl Deadline {
    pub fn new(token: CancellationToken, limit: Duration) -> Self {
        Self {
            token,
            expires_at: Instant::now() + limit,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Run `future` for at most `limit` (and never past this deadline).
    ///
    /// Expiry yields [`Error::Timeout`] naming `operation`; cancellation of
    /// the token yields [`Error::Cancelled`].
    pub async fn bounded<F, T>(
        &self,
        operation: impl Into<String>,
        limit: Duration,
        future: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let effective = limit.min(self.remaining());
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(effective, future) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::timeout(operation, effective)),
            },
        }
    }
}

/// The archive produced by the Archive stage.
///
/// The file is removed from disk when the value is dropped, unless
/// [`Artifact::remove`] already did it.
#[derive(Debug)]
pub struct Artifact {
    path: PathBuf,
    content_type: &'static str,
    extension: &'static str,
    removed: bool,
}

impl Artifact {
    pub fn new(path: PathBuf, content_type: &'static str, extension: &'static str) -> Self {
        Self {
            path,
            content_type,
            extension,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn extension(&self) -> &'static str {
        self.extension
    }

    /// Delete the file now.
    pub async fn remove(mut self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                self.removed = true;
                debug!(path = %self.path.display(), "Removed local archive");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.removed = true;
                Ok(())
            }
            Err(e) => Err(Error::io_path("removing", &self.path, e)),
        }
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed local archive"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove local archive")
            }
        }
    }
}

/// Result of uploading the artifact to one storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub storage: String,
    pub path: String,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Stage-local limits, each nested inside the run deadline.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub archive: Duration,
    pub upload: Duration,
}

/// Everything one run of one folder needs, passed by reference through the stages.
pub struct ExecutionContext {
    pub folder: Arc<FolderJob>,
    pub storages: Vec<Bound<dyn StorageProvider>>,
    pub notifiers: Vec<Bound<dyn NotificationProvider>>,
    pub dispatcher: Dispatcher,
    pub deadline: Deadline,
    pub timeouts: StageTimeouts,
    pub work_dir: PathBuf,
    pub artifact: Option<Artifact>,
    pub uploads: Vec<UploadOutcome>,
}

impl ExecutionContext {
    pub fn folder_name(&self) -> &str {
        &self.folder.name
    }

    /// Message about this folder, identified by its name in the extras.
    pub fn message(&self, level: MessageLevel, subject: impl Into<String>) -> Message {
        Message::new(ENTITY, level, vec![self.folder.name.clone()], subject)
    }

    /// Fan a message out to the folder's notifiers without waiting.
    pub fn notify(&self, message: Message) {
        self.dispatcher.notify(&message, &self.notifiers);
    }

    pub fn notify_info(&self, subject: impl Into<String>) {
        self.notify(self.message(MessageLevel::Info, subject));
    }

    pub fn notify_error(&self, subject: impl Into<String>, error: &Error) {
        self.notify(self.message(MessageLevel::Error, subject).with_error(error));
    }
}
