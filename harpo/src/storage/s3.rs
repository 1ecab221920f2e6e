//! S3-compatible object storage.

use async_trait::async_trait;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use futures::future::BoxFuture;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{BoxedReader, DEFAULT_CONTENT_TYPE, FileInfo, S3, StorageProvider, connectivity_probe};
use crate::provider::{ProviderConfig, optional_bool, optional_str, required_str};
use crate::{Error, Result};

/// Size of each multipart chunk. Payloads smaller than this use a single PUT.
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Upper bound on keys per DeleteObjects request.
const DELETE_BATCH_SIZE: usize = 1000;

fn s3_error(op: &str, path: &str, err: impl std::error::Error) -> Error {
    Error::Storage(format!("S3 {op} '{path}' failed: {}", DisplayErrorContext(err)))
}

pub struct S3Storage {
    client: S3Client,
    bucket: String,
}

impl S3Storage {
    /// Build the client from settings.
    ///
    /// `bucket` and `region` are required. Credentials come from
    /// `access_key_id`/`secret_access_key`, falling back to the
    /// `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` environment variables.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let bucket = required_str(config, "bucket")?.to_string();
        let region = required_str(config, "region")?.to_string();
        let endpoint = optional_str(config, "endpoint")?;
        let force_path = optional_bool(config, "force_path", false)?;

        let access_key_id = optional_str(config, "access_key_id")?
            .map(str::to_string)
            .or_else(|| std::env::var("AWS_ACCESS_KEY_ID").ok())
            .ok_or_else(|| Error::missing_setting("access_key_id"))?;
        let secret_access_key = optional_str(config, "secret_access_key")?
            .map(str::to_string)
            .or_else(|| std::env::var("AWS_SECRET_ACCESS_KEY").ok())
            .ok_or_else(|| Error::missing_setting("secret_access_key"))?;

        let credentials = Credentials::new(access_key_id, secret_access_key, None, None, "harpo");

        let mut builder = aws_sdk_s3::config::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(credentials);

        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if force_path {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: S3Client::from_conf(builder.build()),
            bucket,
        })
    }

    async fn put_single(&self, path: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| s3_error("upload", path, e))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        path: &str,
        first: Vec<u8>,
        reader: &mut BoxedReader,
        content_type: &str,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| s3_error("create multipart upload", path, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| Error::Storage(format!("S3 returned no upload id for '{path}'")))?
            .to_string();

        // Dropping the future mid-upload (timeout, cancellation) still aborts.
        let guard = AbortOnDrop::new({
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = path.to_string();
            let upload_id = upload_id.clone();
            move || -> BoxFuture<'static, ()> {
                Box::pin(abort_multipart(client, bucket, key, upload_id))
            }
        });

        let result = async {
            let parts = self.upload_parts(path, &upload_id, first, reader).await?;
            self.client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map_err(|e| s3_error("complete multipart upload", path, e))?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                guard.disarm();
                Ok(())
            }
            Err(e) => {
                guard.fire().await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        first: Vec<u8>,
        reader: &mut BoxedReader,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut chunk = first;
        let mut part_number: i32 = 1;

        while !chunk.is_empty() {
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| s3_error("upload part of", path, e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            debug!(path = %path, part = part_number, "Uploaded part");

            part_number += 1;
            chunk = read_chunk(reader, PART_SIZE).await?;
        }

        Ok(parts)
    }
}

async fn abort_multipart(client: S3Client, bucket: String, key: String, upload_id: String) {
    match client
        .abort_multipart_upload()
        .bucket(&bucket)
        .key(&key)
        .upload_id(&upload_id)
        .send()
        .await
    {
        Ok(_) => debug!(path = %key, "Aborted multipart upload"),
        Err(e) => warn!(
            path = %key,
            error = %DisplayErrorContext(e),
            "Failed to abort multipart upload"
        ),
    }
}

/// Runs an abort future unless disarmed.
///
/// When dropped while still armed the abort is spawned on the current runtime.
struct AbortOnDrop<F>
where
    F: FnOnce() -> BoxFuture<'static, ()>,
{
    abort: Option<F>,
}

impl<F> AbortOnDrop<F>
where
    F: FnOnce() -> BoxFuture<'static, ()>,
{
    fn new(abort: F) -> Self {
        Self { abort: Some(abort) }
    }

    fn disarm(mut self) {
        self.abort = None;
    }

    /// Run the abort now and wait for it.
    async fn fire(mut self) {
        if let Some(abort) = self.abort.take() {
            abort().await;
        }
    }
}

impl<F> Drop for AbortOnDrop<F>
where
    F: FnOnce() -> BoxFuture<'static, ()>,
{
    fn drop(&mut self) {
        let Some(abort) = self.abort.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(abort());
            }
            Err(_) => warn!("No runtime left to abort the multipart upload"),
        }
    }
}

/// Read up to `size` bytes, stopping early only at end of stream.
async fn read_chunk(reader: &mut BoxedReader, size: usize) -> Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(size);
    (&mut *reader)
        .take(size as u64)
        .read_to_end(&mut chunk)
        .await?;
    Ok(chunk)
}

#[async_trait]
impl StorageProvider for S3Storage {
    fn kind(&self) -> &'static str {
        S3
    }

    async fn test(&self) -> Result<()> {
        connectivity_probe(self).await
    }

    async fn upload(&self, path: &str, mut reader: BoxedReader, content_type: &str) -> Result<()> {
        let content_type = if content_type.is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };

        let first = read_chunk(&mut reader, PART_SIZE).await?;
        if first.len() < PART_SIZE {
            return self.put_single(path, first, content_type).await;
        }
        self.put_multipart(path, first, &mut reader, content_type)
            .await
    }

    async fn download(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| s3_error("download", path, e))?;

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| s3_error("read", path, e))?;
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn info(&self, path: &str) -> Result<FileInfo> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| s3_error("stat", path, e))?;

        let size = head
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0);
        Ok(FileInfo { size })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| s3_error("delete", path, e))?;
        Ok(())
    }

    async fn delete_many(&self, paths: &[String]) -> Result<()> {
        for batch in paths.chunks(DELETE_BATCH_SIZE) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Storage(format!("invalid delete request: {e}")))?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| Error::Storage(format!("invalid delete request: {e}")))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| s3_error("batch delete in", &self.bucket, e))?;
        }
        Ok(())
    }
}
