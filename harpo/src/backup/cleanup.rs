use async_trait::async_trait;
use tracing::{error, info, warn};

use super::context::ExecutionContext;
use super::stage::{Stage, StageFlow};
use crate::notification::MessageLevel;
use crate::utils::fs::clear_dir_contents;

/// Removes the local archive, optionally clears the source folder, then
/// reports the run as complete.
///
/// Clearing is best effort: only a failure to list the folder skips it.
pub struct CleanupStage;

impl CleanupStage {
    async fn clear_folder(ctx: &ExecutionContext) {
        let name = ctx.folder_name();

        match clear_dir_contents(&ctx.folder.path).await {
            Ok(0) => info!(folder = %name, path = %ctx.folder.path.display(), "Folder cleared"),
            Ok(failures) => warn!(folder = %name, failures, "Folder partially cleared"),
            Err(e) => {
                error!(folder = %name, error = %e, "Unable to read folder");
                ctx.notify_error(format!("Unable to read folder {name}"), &e);
            }
        }
    }
}

#[async_trait]
impl Stage for CleanupStage {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> StageFlow {
        if let Some(artifact) = ctx.artifact.take()
            && let Err(e) = artifact.remove().await
        {
            warn!(folder = %ctx.folder_name(), error = %e, "Unable to remove archive file");
        }

        if ctx.folder.remove {
            Self::clear_folder(ctx).await;
        }

        let name = ctx.folder_name();
        ctx.notify(ctx.message(
            MessageLevel::Success,
            format!("Folder {name} has been successfully backed up"),
        ));
        StageFlow::Continue
    }
}
