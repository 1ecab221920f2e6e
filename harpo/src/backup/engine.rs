use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::{Deadline, ExecutionContext, StageTimeouts};
use super::restore::restore_folder;
use super::schedule::Schedule;
use super::scheduler::{JobTask, Scheduler};
use super::stage::{Pipeline, RunReport};
use super::{BACKUP_TAG, TAG, folder_tag};
use crate::config::{EngineConfig, FolderJob};
use crate::notification::{Dispatcher, NotificationProvider};
use crate::provider::Bound;
use crate::storage::StorageProvider;
use crate::{Error, Result};

/// Shared by every job closure.
struct Runner {
    storages: HashMap<String, Arc<dyn StorageProvider>>,
    notifiers: HashMap<String, Arc<dyn NotificationProvider>>,
    config: EngineConfig,
    dispatcher: Dispatcher,
    pipeline: Pipeline,
    token: CancellationToken,
}

impl Runner {
    fn bind<P: ?Sized>(
        folder: &str,
        family: &str,
        names: &[String],
        providers: &HashMap<String, Arc<P>>,
    ) -> Vec<Bound<P>> {
        names
            .iter()
            .filter_map(|name| match providers.get(name) {
                Some(provider) => Some(Bound::new(name.clone(), Arc::clone(provider))),
                None => {
                    warn!(
                        folder = %folder,
                        family,
                        provider = %name,
                        "Provider not found, skipping"
                    );
                    None
                }
            })
            .collect()
    }

    async fn run(&self, folder: Arc<FolderJob>) -> RunReport {
        let storages = Self::bind(&folder.name, "storage", &folder.storages, &self.storages);
        let notifiers = Self::bind(&folder.name, "notifier", &folder.notifiers, &self.notifiers);

        let mut ctx = ExecutionContext {
            folder,
            storages,
            notifiers,
            dispatcher: self.dispatcher.clone(),
            deadline: Deadline::new(self.token.child_token(), self.config.run_timeout()),
            timeouts: StageTimeouts {
                archive: self.config.archive_timeout(),
                upload: self.config.upload_timeout(),
            },
            work_dir: self.config.work_dir(),
            artifact: None,
            uploads: Vec::new(),
        };
        self.pipeline.run(&mut ctx).await
    }
}

/// Owns the folder jobs and their schedules.
///
/// Provider maps are fixed at construction and only read afterwards.
pub struct Engine {
    folders: Vec<Arc<FolderJob>>,
    runner: Arc<Runner>,
    scheduler: Scheduler,
}

impl Engine {
    pub fn new(
        folders: Vec<FolderJob>,
        storages: HashMap<String, Arc<dyn StorageProvider>>,
        notifiers: HashMap<String, Arc<dyn NotificationProvider>>,
        config: EngineConfig,
    ) -> Self {
        Self::with_pipeline(folders, storages, notifiers, config, Pipeline::backup())
    }

    pub fn with_pipeline(
        folders: Vec<FolderJob>,
        storages: HashMap<String, Arc<dyn StorageProvider>>,
        notifiers: HashMap<String, Arc<dyn NotificationProvider>>,
        config: EngineConfig,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            folders: folders.into_iter().map(Arc::new).collect(),
            runner: Arc::new(Runner {
                storages,
                notifiers,
                config,
                dispatcher: Dispatcher::new(),
                pipeline,
                token: CancellationToken::new(),
            }),
            scheduler: Scheduler::new(),
        }
    }

    /// Schedule one job per folder.
    ///
    /// Either every folder gets a job or none does.
    pub fn build_jobs(&self) -> Result<()> {
        for folder in &self.folders {
            if let Err(e) = self.schedule_folder(folder) {
                let rolled_back = self.scheduler.remove_by_tag(TAG);
                warn!(
                    folder = %folder.name,
                    rolled_back,
                    error = %e,
                    "Unable to create backup job"
                );
                return Err(e);
            }
        }
        info!(jobs = self.scheduler.job_count(), "Backup jobs created");
        Ok(())
    }

    fn schedule_folder(&self, folder: &Arc<FolderJob>) -> Result<()> {
        let schedule = Schedule::parse(&folder.schedule)?;
        let tags = vec![TAG.to_string(), BACKUP_TAG.to_string(), folder_tag(&folder.name)];

        let runner = Arc::clone(&self.runner);
        let job_folder = Arc::clone(folder);
        let task: JobTask = Arc::new(move || {
            let runner = Arc::clone(&runner);
            let folder = Arc::clone(&job_folder);
            Box::pin(async move {
                runner.run(folder).await;
            })
        });

        self.scheduler.new_job(folder.name.clone(), schedule, tags, task)
    }

    /// Begin firing jobs. Does nothing when no job was built.
    pub fn start(&self) {
        if self.scheduler.job_count() == 0 {
            info!("No backup jobs to start");
            return;
        }
        self.scheduler.start();
    }

    /// Start, then wait until [`Engine::stop`] is called.
    pub async fn run(&self) {
        self.start();
        self.runner.token.cancelled().await;
    }

    /// Deregister the job of one folder. The scheduler keeps running.
    pub fn remove_job(&self, name: &str) -> bool {
        let removed = self.scheduler.remove_by_tag(&folder_tag(name)) > 0;
        if removed {
            info!(folder = %name, "Backup job removed");
        }
        removed
    }

    pub fn remove_all_jobs(&self) -> usize {
        self.scheduler.remove_by_tag(TAG)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.scheduler.job_names()
    }

    /// Cancel everything and wait for in-flight runs and notifications.
    pub async fn stop(&self) {
        info!("Stopping backup engine");
        self.runner.token.cancel();
        self.scheduler.shutdown().await;
        self.runner.dispatcher.flush().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.runner.token.is_cancelled()
    }

    fn folder(&self, name: &str) -> Result<&Arc<FolderJob>> {
        self.folders
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::validation(format!("unknown folder '{name}'")))
    }

    /// Back up one folder immediately, outside its schedule.
    pub async fn run_now(&self, name: &str) -> Result<RunReport> {
        if self.is_stopped() {
            return Err(Error::Cancelled);
        }
        let folder = Arc::clone(self.folder(name)?);
        let report = self.runner.run(folder).await;
        self.runner.dispatcher.flush().await;
        Ok(report)
    }

    /// Download the archive of `folder` from `storage` and unpack it into `into`.
    pub async fn restore(&self, folder: &str, storage: &str, into: &Path) -> Result<String> {
        let folder = self.folder(folder)?;
        let provider = self
            .runner
            .storages
            .get(storage)
            .ok_or_else(|| Error::validation(format!("unknown storage '{storage}'")))?;

        restore_folder(
            folder,
            &Bound::new(storage, Arc::clone(provider)),
            into,
            &self.runner.config.work_dir(),
            &self.runner.token,
        )
        .await
    }

    /// Release every provider. Failures are logged.
    pub async fn close_providers(&self) {
        for (name, storage) in &self.runner.storages {
            if let Err(e) = storage.close().await {
                warn!(storage = %name, error = %e, "Failed to close storage");
            }
        }
        for (name, notifier) in &self.runner.notifiers {
            if let Err(e) = notifier.close().await {
                warn!(notifier = %name, error = %e, "Failed to close notifier");
            }
        }
    }
}
