//! Fakes shared by unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::backup::{Deadline, ExecutionContext, StageTimeouts};
use crate::config::FolderJob;
use crate::notification::{Dispatcher, Message, MessageLevel, NotificationProvider};
use crate::provider::Bound;
use crate::storage::{BoxedReader, FileInfo, StorageProvider, connectivity_probe};
use crate::{Error, Result};

/// Keeps every message it is sent.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<Message>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.messages.lock().iter().map(|m| m.subject.clone()).collect()
    }

    pub fn count(&self, level: MessageLevel) -> usize {
        self.messages.lock().iter().filter(|m| m.level == level).count()
    }
}

#[async_trait]
impl NotificationProvider for RecordingNotifier {
    fn kind(&self) -> &'static str {
        "RECORDING"
    }

    async fn send(&self, message: &Message) -> Result<()> {
        message.validate()?;
        self.messages.lock().push(message.clone());
        Ok(())
    }
}

pub struct FailingNotifier;

#[async_trait]
impl NotificationProvider for FailingNotifier {
    fn kind(&self) -> &'static str {
        "FAILING"
    }

    async fn send(&self, _message: &Message) -> Result<()> {
        Err(Error::Notification("channel unavailable".into()))
    }
}

/// Object store held in memory.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: AtomicUsize,
}

impl MemoryStorage {
    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.objects.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    fn kind(&self) -> &'static str {
        "MEMORY"
    }

    async fn test(&self) -> Result<()> {
        connectivity_probe(self).await
    }

    async fn upload(&self, path: &str, mut reader: BoxedReader, _content_type: &str) -> Result<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        self.objects.lock().insert(path.to_string(), data);
        Ok(())
    }

    async fn download(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let data = self
            .get(path)
            .ok_or_else(|| Error::Storage(format!("object {path} not found")))?;
        writer.write_all(&data).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn info(&self, path: &str) -> Result<FileInfo> {
        self.get(path)
            .map(|data| FileInfo { size: data.len() as u64 })
            .ok_or_else(|| Error::Storage(format!("object {path} not found")))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().remove(path);
        Ok(())
    }

    async fn delete_many(&self, paths: &[String]) -> Result<()> {
        let mut objects = self.objects.lock();
        for path in paths {
            objects.remove(path);
        }
        Ok(())
    }
}

/// Rejects every operation.
#[derive(Default)]
pub struct FailingStorage {
    attempts: AtomicUsize,
}

impl FailingStorage {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageProvider for FailingStorage {
    fn kind(&self) -> &'static str {
        "FAILING"
    }

    async fn test(&self) -> Result<()> {
        Err(Error::Storage("bucket unreachable".into()))
    }

    async fn upload(&self, _path: &str, _reader: BoxedReader, _content_type: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Storage("bucket unreachable".into()))
    }

    async fn download(
        &self,
        _path: &str,
        _writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        Err(Error::Storage("bucket unreachable".into()))
    }

    async fn info(&self, _path: &str) -> Result<FileInfo> {
        Err(Error::Storage("bucket unreachable".into()))
    }

    async fn delete(&self, _path: &str) -> Result<()> {
        Err(Error::Storage("bucket unreachable".into()))
    }

    async fn delete_many(&self, _paths: &[String]) -> Result<()> {
        Ok(())
    }
}

/// Accepts uploads after a delay.
pub struct SlowStorage {
    pub delay: Duration,
}

#[async_trait]
impl StorageProvider for SlowStorage {
    fn kind(&self) -> &'static str {
        "SLOW"
    }

    async fn test(&self) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, _path: &str, _reader: BoxedReader, _content_type: &str) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn download(
        &self,
        _path: &str,
        _writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        Ok(())
    }

    async fn info(&self, _path: &str) -> Result<FileInfo> {
        Ok(FileInfo { size: 0 })
    }

    async fn delete(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_many(&self, _paths: &[String]) -> Result<()> {
        Ok(())
    }
}

pub fn bound_storage<S: StorageProvider + 'static>(
    name: &str,
    storage: &Arc<S>,
) -> Bound<dyn StorageProvider> {
    Bound::new(name, Arc::clone(storage) as Arc<dyn StorageProvider>)
}

pub fn bound_notifier<N: NotificationProvider + 'static>(
    name: &str,
    notifier: &Arc<N>,
) -> Bound<dyn NotificationProvider> {
    Bound::new(name, Arc::clone(notifier) as Arc<dyn NotificationProvider>)
}

/// A folder with two files and a nested directory.
pub fn populated_folder(root: &Path, name: &str) -> FolderJob {
    let path = root.join(name);
    std::fs::create_dir_all(path.join("nested")).unwrap();
    std::fs::write(path.join("a.txt"), "alpha").unwrap();
    std::fs::write(path.join("nested").join("b.txt"), "bravo").unwrap();
    FolderJob::new(name, path, format!("backups/{name}"), "@every 1h")
}

pub fn context(
    folder: FolderJob,
    storages: Vec<Bound<dyn StorageProvider>>,
    notifiers: Vec<Bound<dyn NotificationProvider>>,
    work_dir: &Path,
) -> ExecutionContext {
    ExecutionContext {
        folder: Arc::new(folder),
        storages,
        notifiers,
        dispatcher: Dispatcher::new(),
        deadline: Deadline::new(CancellationToken::new(), Duration::from_secs(60)),
        timeouts: StageTimeouts {
            archive: Duration::from_secs(30),
            upload: Duration::from_secs(30),
        },
        work_dir: work_dir.to_path_buf(),
        artifact: None,
        uploads: Vec::new(),
    }
}
