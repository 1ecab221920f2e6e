use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::context::{Artifact, ExecutionContext};
use super::stage::{Stage, StageFlow};
use crate::Result;
use crate::archiving::{ArchiveKind, ArchiveProvider};
use crate::utils::fs::{ensure_dir_all_with_op, io_error};

/// Produces the local archive of the folder.
///
/// Halts the run on any failure: there is nothing to upload.
pub struct ArchiveStage;

impl ArchiveStage {
    /// Kind selected by the folder, falling back to the default one.
    fn resolve_kind(ctx: &ExecutionContext) -> ArchiveKind {
        let selector = ctx.folder.archiver.trim();
        match ArchiveKind::from_selector(selector) {
            Some(kind) => kind,
            None => {
                if !selector.is_empty() {
                    warn!(
                        folder = %ctx.folder_name(),
                        archiver = %selector,
                        fallback = ArchiveKind::default().as_str(),
                        "Unknown archiver, using default"
                    );
                }
                ArchiveKind::default()
            }
        }
    }

    /// Create a uniquely named file in the work directory.
    ///
    /// The returned guard removes the file if the run stops early.
    async fn create_artifact(
        ctx: &ExecutionContext,
        kind: ArchiveKind,
        provider: &dyn ArchiveProvider,
    ) -> Result<(Artifact, std::fs::File)> {
        ensure_dir_all_with_op("creating work directory", &ctx.work_dir).await?;

        let path = ctx
            .work_dir
            .join(format!("{}{}", Uuid::new_v4(), provider.extension()));
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| io_error("creating", &path, e))?
            .into_std()
            .await;

        Ok((
            Artifact::new(path, kind.content_type(), provider.extension()),
            file,
        ))
    }
}

#[async_trait]
impl Stage for ArchiveStage {
    fn name(&self) -> &'static str {
        "archive"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> StageFlow {
        let name = ctx.folder.name.clone();
        let kind = Self::resolve_kind(ctx);

        let provider = match kind.provider() {
            Ok(provider) => provider,
            Err(e) => {
                error!(folder = %name, error = %e, "Unable to get archiver provider");
                ctx.notify_error(format!("Unable to get archiver provider of folder {name}"), &e);
                return StageFlow::Halt;
            }
        };

        ctx.notify_info(format!("Backup process of folder {name} started"));

        let (artifact, file) = match Self::create_artifact(ctx, kind, provider.as_ref()).await {
            Ok(created) => created,
            Err(e) => {
                error!(folder = %name, error = %e, "Unable to create archive file");
                ctx.notify_error(format!("Unable to create archive file of folder {name}"), &e);
                return StageFlow::Halt;
            }
        };

        // Stops the blocking codec if the limit is hit or the run is cancelled.
        let token = ctx.deadline.token().child_token();
        let _stop_codec = token.clone().drop_guard();

        let result = ctx
            .deadline
            .bounded(
                format!("archive of folder {name}"),
                ctx.timeouts.archive,
                provider.archive(
                    &token,
                    &ctx.folder.path,
                    file,
                    ctx.folder.ignore_archive_errors,
                ),
            )
            .await;

        if let Err(e) = result {
            error!(folder = %name, error = %e, "Unable to archive folder");
            ctx.notify_error(format!("Unable to archive folder {name}"), &e);
            drop(artifact);
            return StageFlow::Halt;
        }

        info!(
            folder = %name,
            archiver = kind.as_str(),
            path = %artifact.path().display(),
            "Folder archived"
        );
        ctx.notify_info(format!("Archival of folder {name} completed"));
        ctx.artifact = Some(artifact);
        StageFlow::Continue
    }
}
