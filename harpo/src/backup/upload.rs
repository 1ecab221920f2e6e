use async_trait::async_trait;
use tokio::io::BufReader;
use tracing::{error, info};

use super::context::{ExecutionContext, UploadOutcome};
use super::stage::{Stage, StageFlow};
use crate::Error;
use crate::storage::BoxedReader;
use crate::utils::filename::archive_object_path;

/// Sends the local archive to every bound storage concurrently.
///
/// Each destination reads its own handle on the file and has its own time
/// limit. A failing destination does not affect the others, and the stage
/// always lets cleanup run.
pub struct UploadStage;

#[async_trait]
impl Stage for UploadStage {
    fn name(&self) -> &'static str {
        "upload"
    }

    async fn execute(&self, ctx: &mut ExecutionContext) -> StageFlow {
        let name = ctx.folder.name.clone();

        let Some(artifact) = ctx.artifact.as_ref() else {
            let e = Error::Other("no archive was produced".to_string());
            error!(folder = %name, "Unable to get archive file");
            ctx.notify_error(format!("Unable to get archive file of folder {name}"), &e);
            return StageFlow::Halt;
        };

        let local_path = artifact.path().to_path_buf();
        let content_type = artifact.content_type();
        let object_path =
            archive_object_path(&ctx.folder.name, &ctx.folder.destination, artifact.extension());

        ctx.notify_info(format!("Started archive upload of folder {name}"));

        let mut handles = Vec::with_capacity(ctx.storages.len());
        for bound in ctx.storages.iter().cloned() {
            let deadline = ctx.deadline.clone();
            let limit = ctx.timeouts.upload;
            let local_path = local_path.clone();
            let object_path = object_path.clone();
            let operation = format!("upload of folder {name} to storage {}", bound.name);
            let storage = bound.name.clone();

            let handle = tokio::spawn(async move {
                deadline
                    .bounded(operation, limit, async {
                        let file = tokio::fs::File::open(&local_path)
                            .await
                            .map_err(|e| Error::io_path("opening", &local_path, e))?;
                        let reader: BoxedReader = Box::new(BufReader::new(file));
                        bound
                            .provider
                            .upload(&object_path, reader, content_type)
                            .await
                    })
                    .await
            });
            handles.push((storage, handle));
        }

        // Wait for every destination before moving on.
        for (storage, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::Other(format!("upload task failed: {e}"))),
            };

            match result {
                Ok(()) => {
                    info!(
                        folder = %name,
                        storage = %storage,
                        path = %object_path,
                        "Archive uploaded"
                    );
                    ctx.notify_info(format!("Archive uploaded to storage {storage}"));
                    ctx.uploads.push(UploadOutcome {
                        storage,
                        path: object_path.clone(),
                        error: None,
                    });
                }
                Err(e) => {
                    error!(
                        folder = %name,
                        storage = %storage,
                        error = %e,
                        "Unable to upload archive"
                    );
                    ctx.notify_error(format!("Unable to upload archive to storage {storage}"), &e);
                    ctx.uploads.push(UploadOutcome {
                        storage,
                        path: object_path.clone(),
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        StageFlow::Continue
    }
}
