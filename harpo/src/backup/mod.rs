//! Backup orchestration: the stage pipeline, scheduling and the engine.
//!
//! A run of one folder goes through [`ArchiveStage`], [`UploadStage`] and
//! [`CleanupStage`] in order, driven by [`Pipeline`]. The [`Engine`] owns one
//! recurring job per folder and builds a fresh [`ExecutionContext`] for every
//! firing.

mod archive;
mod cleanup;
mod context;
mod engine;
mod restore;
mod schedule;
mod scheduler;
mod stage;
mod upload;

pub use archive::ArchiveStage;
pub use cleanup::CleanupStage;
pub use context::{Artifact, Deadline, ExecutionContext, StageTimeouts, UploadOutcome};
pub use engine::Engine;
pub use restore::restore_folder;
pub use schedule::Schedule;
pub use scheduler::{JobTask, Scheduler};
pub use stage::{Pipeline, RunReport, Stage, StageFlow};
pub use upload::UploadStage;

/// Entity reported in every backup notification.
pub const ENTITY: &str = "Harpo Backup";

/// Carried by every job the engine schedules.
pub const TAG: &str = "harpo";

/// Carried by every folder backup job.
pub const BACKUP_TAG: &str = "harpo:backup";

/// Tag identifying the backup job of one folder.
pub fn folder_tag(name: &str) -> String {
    format!("{BACKUP_TAG}:{name}")
}
