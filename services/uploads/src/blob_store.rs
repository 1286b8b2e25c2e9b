use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Marker prepended to keys of blobs that went through recompression
pub const COMPRESSED_MARKER: &str = "compressed";

/// Object storage for uploaded blobs.
///
/// The store does not dedupe: a caller retrying a failed upload must derive a
/// fresh path. A failed upload leaves nothing visible under `path`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `path`, returning the stored path
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;

    /// Time-limited read URL for a stored blob
    async fn presigned_url(&self, path: &str, expiry: Duration) -> Result<String>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
    config: S3Config,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small blobs
    async fn simple_upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload blob to S3")?;

        Ok(())
    }

    /// Multipart upload for large blobs
    async fn multipart_upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?
            .to_string();

        let finish = async {
            let parts = self.upload_parts(path, &upload_id, &bytes).await?;
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
                .context("Failed to complete multipart upload")?;
            Ok::<_, anyhow::Error>(())
        };

        let abort = async {
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(&upload_id)
                .send()
                .await
                .context("Failed to abort multipart upload")?;
            Ok::<_, anyhow::Error>(())
        };

        finish_or_abort(path, finish, abort).await
    }

    async fn upload_parts(
        &self,
        path: &str,
        upload_id: &str,
        bytes: &[u8],
    ) -> Result<Vec<CompletedPart>> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in bytes.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;
            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(path)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .context("Failed to upload part")?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        Ok(completed_parts)
    }
}

/// Drive a started multipart upload to completion, aborting it if any part or
/// the completion fails so the uploaded parts are discarded
async fn finish_or_abort<F, A>(path: &str, finish: F, abort: A) -> Result<()>
where
    F: Future<Output = Result<()>>,
    A: Future<Output = Result<()>>,
{
    let Err(e) = finish.await else {
        return Ok(());
    };

    if let Err(abort_err) = abort.await {
        warn!(error = %abort_err, path = %path, "Failed to abort multipart upload");
    }
    Err(e)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes), fields(size_bytes = bytes.len()))]
    async fn upload(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<String> {
        let size_bytes = bytes.len();

        if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(path, bytes, content_type).await?;
        } else {
            self.simple_upload(path, bytes, content_type).await?;
        }

        debug!(path = %path, size_bytes, "Blob uploaded");

        Ok(path.to_string())
    }

    async fn presigned_url(&self, path: &str, expiry: Duration) -> Result<String> {
        let presigning_config =
            PresigningConfig::expires_in(expiry).context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        Ok(presigned.uri().to_string())
    }
}

/// Derive a storage key: `{compressed_}{token}_{owner}_{filename}`.
///
/// The token is unix millis plus a random suffix, so two uploads of the same
/// file by the same owner never share a key.
pub fn derive_blob_path(compressed: bool, owner_id: &str, filename: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    let token = format!("{}-{}", Utc::now().timestamp_millis(), &uuid[..8]);
    let owner = sanitize_path_component(owner_id);
    let filename = sanitize_path_component(filename);

    if compressed {
        format!("{COMPRESSED_MARKER}_{token}_{owner}_{filename}")
    } else {
        format!("{token}_{owner}_{filename}")
    }
}

/// Sanitize a path component to prevent path traversal
pub fn sanitize_path_component(component: &str) -> String {
    let mapped: String = component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();

    let sanitized = mapped.replace("..", "_");

    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized
    }
}

/// Get content type from a filename extension
pub fn content_type_for(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}
