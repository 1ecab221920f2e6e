use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use super::context::Artifact;
use crate::Result;
use crate::config::FolderJob;
use crate::provider::Bound;
use crate::storage::StorageProvider;
use crate::utils::fs::{ensure_dir_all_with_op, io_error};

/// Fetch the latest archive of `folder` from `storage` and unpack it into `into`.
///
/// The archive is staged in `work_dir` and removed afterwards. Returns the
/// object path that was restored.
pub async fn restore_folder(
    folder: &FolderJob,
    storage: &Bound<dyn StorageProvider>,
    into: &Path,
    work_dir: &Path,
    token: &CancellationToken,
) -> Result<String> {
    let kind = folder.archive_kind();
    let archiver = kind.provider()?;
    let object_path = folder.object_path();

    ensure_dir_all_with_op("creating work directory", work_dir).await?;
    ensure_dir_all_with_op("creating restore directory", into).await?;

    let local = work_dir.join(format!("{}{}", Uuid::new_v4(), archiver.extension()));
    let artifact = Artifact::new(local.clone(), kind.content_type(), archiver.extension());

    {
        let mut file = tokio::fs::File::create(&local)
            .await
            .map_err(|e| io_error("creating", &local, e))?;
        storage.provider.download(&object_path, &mut file).await?;
        file.sync_all()
            .await
            .map_err(|e| io_error("syncing", &local, e))?;
    }

    let file = std::fs::File::open(&local).map_err(|e| io_error("opening", &local, e))?;
    archiver.extract(token, file, into, false).await?;
    artifact.remove().await?;

    info!(
        folder = %folder.name,
        storage = %storage.name,
        object = %object_path,
        into = %into.display(),
        "Folder restored"
    );
    Ok(object_path)
}
