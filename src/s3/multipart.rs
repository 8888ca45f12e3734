use anyhow::{Context, Result, bail};
use aws_sdk_s3::{
    Client,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::acl::CannedAcl;
use super::helpers::detect_content_type;
use super::transfer::TransferReporter;

// Threshold for using multipart upload (100MB)
pub const MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;

// Size of each part (10MB) - AWS minimum is 5MB
const PART_SIZE: usize = 10 * 1024 * 1024;

/// Upload a large file using S3 multipart upload
///
/// The canned ACL and Content-Type are fixed when the upload is created.
/// If any part fails, or the transfer is canceled between or during parts,
/// the multipart upload is aborted so no orphaned parts are left behind in
/// the bucket.
pub async fn upload_multipart(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    local_path: &Path,
    acl: CannedAcl,
    reporter: &TransferReporter,
) -> Result<()> {
    let file_size = tokio::fs::metadata(local_path).await?.len();

    info!(
        "Starting multipart upload for {} ({} bytes, {} parts)",
        local_path.display(),
        file_size,
        (file_size as usize).div_ceil(PART_SIZE)
    );

    let multipart = client
        .create_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .content_type(detect_content_type(local_path))
        .acl(acl.into())
        .send()
        .await
        .context("Failed to initiate multipart upload")?;

    let upload_id = multipart
        .upload_id()
        .context("No upload ID returned from S3")?;

    debug!("Multipart upload initiated with ID: {}", upload_id);

    match upload_parts(client, bucket, s3_key, upload_id, local_path, reporter).await {
        Ok(parts) => {
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build();

            client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(s3_key)
                .upload_id(upload_id)
                .multipart_upload(completed)
                .send()
                .await
                .context("Failed to complete multipart upload")?;

            info!(
                "Completed multipart upload: {} -> s3://{}/{}",
                local_path.display(),
                bucket,
                s3_key
            );
            Ok(())
        }
        Err(e) => {
            debug!("Aborting multipart upload {}: {:#}", upload_id, e);
            if let Err(abort_err) = abort_multipart_upload(client, bucket, s3_key, upload_id).await
            {
                warn!("{:#}", abort_err);
            }
            Err(e)
        }
    }
}

async fn upload_parts(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    upload_id: &str,
    local_path: &Path,
    reporter: &TransferReporter,
) -> Result<Vec<CompletedPart>> {
    let mut file = tokio::fs::File::open(local_path).await?;
    let mut parts = Vec::new();
    let mut part_number = 1i32;

    loop {
        let buffer = read_part(&mut file).await?;
        if buffer.is_empty() {
            break; // EOF
        }
        let bytes_read = buffer.len() as u64;

        debug!("Uploading part {} ({} bytes)", part_number, bytes_read);

        let send = client
            .upload_part()
            .bucket(bucket)
            .key(s3_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(buffer))
            .send();

        let part_result = tokio::select! {
            biased;
            _ = reporter.canceled() => bail!("Upload canceled at part {}", part_number),
            result = send => result.with_context(|| format!("Failed to upload part {}", part_number))?,
        };

        parts.push(
            CompletedPart::builder()
                .part_number(part_number)
                .e_tag(part_result.e_tag().unwrap_or(""))
                .build(),
        );

        reporter.add_bytes(bytes_read);
        part_number += 1;
    }

    Ok(parts)
}

/// Fill one part buffer; short reads from the file are retried until EOF
async fn read_part(file: &mut tokio::fs::File) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; PART_SIZE];
    let mut filled = 0;
    while filled < PART_SIZE {
        let n = file.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Abort a multipart upload (for cleanup on error)
async fn abort_multipart_upload(
    client: &Client,
    bucket: &str,
    s3_key: &str,
    upload_id: &str,
) -> Result<()> {
    client
        .abort_multipart_upload()
        .bucket(bucket)
        .key(s3_key)
        .upload_id(upload_id)
        .send()
        .await
        .with_context(|| format!("Failed to abort multipart upload {}", upload_id))?;

    debug!("Aborted multipart upload {}", upload_id);

    Ok(())
}
