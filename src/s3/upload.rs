use anyhow::{Context, Result, bail};
use aws_sdk_s3::{Client, primitives::ByteStream};
use std::path::Path;
use tracing::debug;

use super::acl::CannedAcl;
use super::helpers::{content_md5, detect_content_type};
use super::multipart::upload_multipart;
use super::transfer::TransferReporter;

/// Upload one local file as `s3://bucket/s3_key`
///
/// Files at or above `multipart_threshold` bytes go through a multipart
/// upload, smaller ones through a single PutObject with a Content-MD5 check.
pub async fn upload_entry(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    acl: CannedAcl,
    multipart_threshold: u64,
    reporter: &TransferReporter,
) -> Result<()> {
    let file_size = tokio::fs::metadata(local_path)
        .await
        .with_context(|| format!("Failed to get metadata of {}", local_path.display()))?
        .len();

    debug!(
        "{} -> s3://{}/{} ({} bytes, {})",
        local_path.display(),
        bucket,
        s3_key,
        file_size,
        acl
    );

    if reporter.is_canceled() {
        bail!("Upload of {} canceled", local_path.display());
    }

    if file_size >= multipart_threshold {
        upload_multipart(client, bucket, s3_key, local_path, acl, reporter).await
    } else {
        upload_file(client, bucket, s3_key, local_path, acl, reporter).await
    }
}

/// Upload a file to S3 in a single request
pub async fn upload_file(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    acl: CannedAcl,
    reporter: &TransferReporter,
) -> Result<()> {
    let file_size = tokio::fs::metadata(local_path)
        .await
        .context("Failed to get file metadata")?
        .len();

    let md5 = content_md5(local_path)
        .await
        .context("Failed to compute Content-MD5")?;

    // Create ByteStream from file
    let body = ByteStream::from_path(local_path)
        .await
        .context("Failed to create byte stream from file")?;

    let send = client
        .put_object()
        .bucket(bucket)
        .key(s3_key)
        .body(body)
        .content_length(file_size as i64)
        .content_type(detect_content_type(local_path))
        .content_md5(md5)
        .acl(acl.into())
        .send();

    tokio::select! {
        biased;
        _ = reporter.canceled() => bail!("Upload of {} canceled", local_path.display()),
        result = send => {
            result.context("Failed to upload file to S3")?;
        }
    }

    reporter.add_bytes(file_size);

    Ok(())
}
