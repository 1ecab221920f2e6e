//! Tagged recurring jobs.
//!
//! Each job runs on its own task: sleep until the next firing, run the job to
//! completion, repeat. A job therefore never overlaps with itself, and firings
//! missed while it was running are skipped. Different jobs run concurrently.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::schedule::Schedule;
use crate::{Error, Result};

/// Work run on every firing.
pub type JobTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct ScheduledJob {
    name: String,
    tags: Vec<String>,
    schedule: Schedule,
    task: JobTask,
    token: CancellationToken,
}

pub struct Scheduler {
    jobs: Mutex<Vec<ScheduledJob>>,
    token: CancellationToken,
    tracker: TaskTracker,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Register a job. Names must be unique.
    ///
    /// If the scheduler is already running the job starts immediately.
    pub fn new_job(
        &self,
        name: impl Into<String>,
        schedule: Schedule,
        tags: Vec<String>,
        task: JobTask,
    ) -> Result<()> {
        let name = name.into();
        let mut jobs = self.jobs.lock();
        if jobs.iter().any(|job| job.name == name) {
            return Err(Error::validation(format!("job '{name}' is already scheduled")));
        }

        let job = ScheduledJob {
            name,
            tags,
            schedule,
            task,
            token: self.token.child_token(),
        };
        if self.running.load(Ordering::SeqCst) {
            self.spawn_job(&job);
        }
        jobs.push(job);
        Ok(())
    }

    /// Begin firing every registered job.
    pub fn start(&self) {
        if self.token.is_cancelled() || self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let jobs = self.jobs.lock();
        for job in jobs.iter() {
            self.spawn_job(job);
        }
        info!(jobs = jobs.len(), "Scheduler started");
    }

    fn spawn_job(&self, job: &ScheduledJob) {
        let name = job.name.clone();
        let schedule = job.schedule.clone();
        let task = Arc::clone(&job.task);
        let token = job.token.clone();

        self.tracker.spawn(async move {
            debug!(job = %name, "Job loop started");
            loop {
                let Some(delay) = schedule.delay_until_next() else {
                    warn!(job = %name, "Schedule has no upcoming firing");
                    break;
                };

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                debug!(job = %name, "Job fired");
                (task)().await;
            }
            debug!(job = %name, "Job loop stopped");
        });
    }

    /// Deregister every job carrying `tag`. Runs already in flight finish.
    pub fn remove_by_tag(&self, tag: &str) -> usize {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|job| {
            if job.tags.iter().any(|t| t == tag) {
                job.token.cancel();
                false
            } else {
                true
            }
        });
        before - jobs.len()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|job| job.name.clone()).collect()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }

    /// Stop every job and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Scheduler stopped");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
