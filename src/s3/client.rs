use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::retry::RetryConfig;
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::DisplayErrorContext;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::helpers::collect_directory_files;
use super::multipart::MULTIPART_THRESHOLD;
use super::service::{DirectoryUpload, ObjectUpload, StorageService};
use super::transfer::{Transfer, TransferState};
use super::upload::upload_entry;
use crate::config::DEFAULT_MAX_CONCURRENT;
use crate::error::{Result, UploadError};

/// Where the client takes its credentials from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Static {
        access_key: String,
        secret_key: String,
    },
    /// Environment, shared config/profile, then container or instance metadata
    DefaultChain,
}

/// Pick static credentials when both keys are given, the default chain otherwise
pub fn resolve_credentials(access_key: Option<&str>, secret_key: Option<&str>) -> CredentialSource {
    match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) if !access_key.is_empty() && !secret_key.is_empty() => {
            CredentialSource::Static {
                access_key: access_key.to_string(),
                secret_key: secret_key.to_string(),
            }
        }
        _ => CredentialSource::DefaultChain,
    }
}

/// Everything needed to build a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub credentials: CredentialSource,
    pub region: String,
}

/// Tuning for the transfer layer
#[derive(Debug, Clone, Copy)]
pub struct TransferOptions {
    /// Objects uploaded in parallel during a directory transfer
    pub max_concurrent: usize,
    pub multipart_threshold: u64,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            multipart_threshold: MULTIPART_THRESHOLD,
        }
    }
}

pub struct S3Client {
    client: Client,
    options: TransferOptions,
    progress: Option<ProgressBar>,
}

impl S3Client {
    /// Build a client bound to `settings.region`
    ///
    /// # Errors
    ///
    /// Returns an auth error if no credentials can be resolved
    pub async fn connect(settings: ClientSettings, options: TransferOptions) -> Result<Self> {
        let mut aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()));

        if let CredentialSource::Static {
            access_key,
            secret_key,
        } = &settings.credentials
        {
            aws_config = aws_config.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "s3-upload-static",
            ));
        }

        let sdk_config = aws_config.load().await;

        let provider = sdk_config
            .credentials_provider()
            .ok_or_else(|| UploadError::auth("no AWS credentials provider is configured"))?;
        provider.provide_credentials().await.map_err(|e| {
            UploadError::auth(format!(
                "unable to resolve AWS credentials: {}",
                DisplayErrorContext(&e)
            ))
        })?;

        debug!(
            "S3 client ready (region {}, {} credentials)",
            settings.region,
            match settings.credentials {
                CredentialSource::Static { .. } => "static",
                CredentialSource::DefaultChain => "default chain",
            }
        );

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .retry_config(RetryConfig::standard().with_max_attempts(3))
            .build();

        Ok(Self {
            client: Client::from_conf(s3_config),
            options,
            progress: None,
        })
    }

    /// Report byte progress of every transfer on `pb`
    pub fn with_progress_bar(mut self, pb: ProgressBar) -> Self {
        self.progress = Some(pb);
        self
    }
}

#[async_trait]
impl StorageService for S3Client {
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let err = match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => return Ok(true),
            Err(err) => err,
        };

        if err.as_service_error().is_some_and(|e| e.is_not_found()) {
            return Ok(false);
        }

        match err.raw_response().map(|r| r.status().as_u16()) {
            Some(404) => Ok(false),
            // Roles allowed to PutObject but not ListBucket get 403 here
            Some(403) => {
                warn!(
                    "Access to bucket '{}' is forbidden for HeadBucket, assuming it exists",
                    bucket
                );
                Ok(true)
            }
            Some(401) => Err(UploadError::auth(format!(
                "access to bucket '{}' denied (HTTP 401)",
                bucket
            ))),
            _ => Err(UploadError::from_aws_error(bucket, DisplayErrorContext(&err))),
        }
    }

    async fn upload_object(&self, request: ObjectUpload) -> Result<Transfer> {
        let size = tokio::fs::metadata(&request.source)
            .await
            .map_err(|e| {
                UploadError::upload(format!("Failed to read {}: {}", request.source.display(), e))
            })?
            .len();

        let client = self.client.clone();
        let threshold = self.options.multipart_threshold;

        Ok(Transfer::spawn(size, self.progress.clone(), move |reporter| async move {
            reporter.start();
            let result = upload_entry(
                &client,
                &request.bucket,
                &request.key,
                &request.source,
                request.acl,
                threshold,
                &reporter,
            )
            .await;

            match result {
                Ok(()) => reporter.finish(TransferState::Completed),
                Err(e) if reporter.is_canceled() => {
                    warn!("{:#}", e);
                    reporter.finish(TransferState::Canceled);
                }
                Err(e) => {
                    error!("Upload failed for {}: {:#}", request.source.display(), e);
                    reporter.finish(TransferState::Failed);
                }
            }
        }))
    }

    async fn upload_directory(&self, request: DirectoryUpload) -> Result<Transfer> {
        let entries = collect_directory_files(
            &request.source,
            request.prefix.as_deref(),
            request.recursive,
        )
        .map_err(|e| UploadError::configuration(format!("{:#}", e)))?;

        let total: u64 = entries.iter().map(|e| e.size).sum();
        info!(
            "Uploading {} file(s) from {}",
            entries.len(),
            request.source.display()
        );

        let client = self.client.clone();
        let options = self.options;

        Ok(Transfer::spawn(total, self.progress.clone(), move |reporter| async move {
            reporter.start();
            let reporter = Arc::new(reporter);
            let semaphore = Arc::new(Semaphore::new(options.max_concurrent));
            let mut tasks = JoinSet::new();

            for entry in entries {
                let acl = (request.acl_for)(&entry.path);
                let client = client.clone();
                let bucket = request.bucket.clone();
                let reporter = Arc::clone(&reporter);
                let semaphore = Arc::clone(&semaphore);

                tasks.spawn(async move {
                    let _permit = semaphore.acquire_owned().await?;
                    upload_entry(
                        &client,
                        &bucket,
                        &entry.key,
                        &entry.path,
                        acl,
                        options.multipart_threshold,
                        &reporter,
                    )
                    .await
                    .map_err(|e| e.context(format!("Failed to upload {}", entry.path.display())))
                });
            }

            let mut failed = 0usize;
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) if reporter.is_canceled() => {
                        debug!("{:#}", e);
                        failed += 1;
                    }
                    Ok(Err(e)) => {
                        error!("{:#}", e);
                        failed += 1;
                    }
                    Err(e) => {
                        error!("Upload task panicked: {}", e);
                        failed += 1;
                    }
                }
            }

            if reporter.is_canceled() {
                warn!("Directory upload canceled, {} file(s) not uploaded", failed);
                reporter.finish(TransferState::Canceled);
            } else if failed == 0 {
                reporter.finish(TransferState::Completed);
            } else {
                error!("{} file(s) failed to upload", failed);
                reporter.finish(TransferState::Failed);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::acl::{AclProvider, CannedAcl, directory_acl};
    use aws_sdk_s3::error::ErrorMetadata;
    use aws_sdk_s3::operation::head_bucket::{HeadBucketError, HeadBucketOutput};
    use aws_sdk_s3::operation::put_object::{PutObjectError, PutObjectOutput};
    use aws_sdk_s3::types::ObjectCannedAcl;
    use aws_sdk_s3::types::error::NotFound;
    use aws_smithy_mocks::{Rule, RuleMode, mock, mock_client};
    use aws_smithy_runtime_api::http::{Response, StatusCode};
    use aws_smithy_types::body::SdkBody;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn storage(client: Client) -> S3Client {
        S3Client {
            client,
            options: TransferOptions::default(),
            progress: None,
        }
    }

    fn head_bucket_status(status: u16) -> Rule {
        mock!(Client::head_bucket).then_http_response(move || {
            Response::new(
                StatusCode::try_from(status).unwrap(),
                SdkBody::empty(),
            )
        })
    }

    fn put_rule(key: &'static str, acl: ObjectCannedAcl) -> Rule {
        mock!(Client::put_object)
            .match_requests(move |r| {
                r.bucket() == Some("my-bucket")
                    && r.key() == Some(key)
                    && r.acl() == Some(&acl)
                    && r.content_md5().is_some()
                    && r.content_type() == Some("text/plain")
            })
            .then_output(|| PutObjectOutput::builder().build())
    }

    #[test]
    fn test_resolve_credentials_static() {
        assert_eq!(
            resolve_credentials(Some("AKIA"), Some("secret")),
            CredentialSource::Static {
                access_key: "AKIA".to_string(),
                secret_key: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_resolve_credentials_falls_back_to_chain() {
        assert_eq!(resolve_credentials(None, None), CredentialSource::DefaultChain);
        assert_eq!(
            resolve_credentials(Some("AKIA"), None),
            CredentialSource::DefaultChain
        );
        assert_eq!(
            resolve_credentials(None, Some("secret")),
            CredentialSource::DefaultChain
        );
        assert_eq!(
            resolve_credentials(Some(""), Some("secret")),
            CredentialSource::DefaultChain
        );
    }

    #[test]
    fn test_transfer_options_default() {
        let options = TransferOptions::default();
        assert_eq!(options.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(options.multipart_threshold, MULTIPART_THRESHOLD);
    }

    #[tokio::test]
    async fn test_bucket_exists_for_head_bucket_answers() {
        let ok = mock!(Client::head_bucket).then_output(|| HeadBucketOutput::builder().build());
        let s3 = storage(mock_client!(aws_sdk_s3, [&ok]));
        assert!(s3.bucket_exists("my-bucket").await.unwrap());

        let missing = mock!(Client::head_bucket)
            .then_error(|| HeadBucketError::NotFound(NotFound::builder().build()));
        let s3 = storage(mock_client!(aws_sdk_s3, [&missing]));
        assert!(!s3.bucket_exists("my-bucket").await.unwrap());

        let missing = head_bucket_status(404);
        let s3 = storage(mock_client!(aws_sdk_s3, [&missing]));
        assert!(!s3.bucket_exists("my-bucket").await.unwrap());

        // PutObject-only roles cannot HeadBucket
        let forbidden = head_bucket_status(403);
        let s3 = storage(mock_client!(aws_sdk_s3, [&forbidden]));
        assert!(s3.bucket_exists("my-bucket").await.unwrap());

        let unauthorized = head_bucket_status(401);
        let s3 = storage(mock_client!(aws_sdk_s3, [&unauthorized]));
        let err = s3.bucket_exists("my-bucket").await.unwrap_err();
        assert!(matches!(err, UploadError::Auth(_)));
    }

    #[tokio::test]
    async fn test_object_upload_sends_acl_and_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.txt");
        fs::write(&path, b"quarterly numbers").unwrap();

        let put = put_rule("reports/report.txt", ObjectCannedAcl::BucketOwnerFullControl);
        let s3 = storage(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put]));

        let transfer = s3
            .upload_object(ObjectUpload {
                bucket: "my-bucket".to_string(),
                key: "reports/report.txt".to_string(),
                source: path,
                acl: CannedAcl::BucketOwnerFullControl,
            })
            .await
            .unwrap();

        let state = transfer
            .wait_for_completion(std::future::pending())
            .await
            .unwrap();
        assert_eq!(state, TransferState::Completed);
        assert_eq!(transfer.bytes_transferred(), 17);
        assert_eq!(put.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_recursive_public_directory_upload() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/b.txt"), b"bb").unwrap();

        let put_a = put_rule("site/a.txt", ObjectCannedAcl::PublicRead);
        let put_b = put_rule("site/sub/b.txt", ObjectCannedAcl::PublicRead);
        let s3 = storage(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put_a, &put_b]));

        let evaluated = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evaluated);
        let public = directory_acl(true);
        let acl_for: AclProvider = Arc::new(move |path: &Path| {
            counter.fetch_add(1, Ordering::SeqCst);
            public(path)
        });

        let transfer = s3
            .upload_directory(DirectoryUpload {
                bucket: "my-bucket".to_string(),
                prefix: Some("site".to_string()),
                source: dir.path().to_path_buf(),
                recursive: true,
                acl_for,
            })
            .await
            .unwrap();
        assert_eq!(transfer.total_bytes(), 5);

        let state = transfer
            .wait_for_completion(std::future::pending())
            .await
            .unwrap();
        assert_eq!(state, TransferState::Completed);
        assert_eq!(transfer.bytes_transferred(), 5);
        assert_eq!(put_a.num_calls(), 1);
        assert_eq!(put_b.num_calls(), 1);
        assert_eq!(evaluated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_put_object_fails_directory_transfer() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"aaa").unwrap();

        let put = mock!(Client::put_object).then_error(|| {
            PutObjectError::generic(
                ErrorMetadata::builder()
                    .code("AccessDenied")
                    .message("Access Denied")
                    .build(),
            )
        });
        let s3 = storage(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put]));

        let transfer = s3
            .upload_directory(DirectoryUpload {
                bucket: "my-bucket".to_string(),
                prefix: None,
                source: dir.path().to_path_buf(),
                recursive: false,
                acl_for: directory_acl(true),
            })
            .await
            .unwrap();

        let state = transfer
            .wait_for_completion(std::future::pending())
            .await
            .unwrap();
        assert_eq!(state, TransferState::Failed);
        assert_eq!(transfer.bytes_transferred(), 0);
        assert!(!transfer.outcome().is_completed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_directory_entry_is_a_configuration_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"aaa").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();

        let put = mock!(Client::put_object).then_output(|| PutObjectOutput::builder().build());
        let s3 = storage(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&put]));

        let err = s3
            .upload_directory(DirectoryUpload {
                bucket: "my-bucket".to_string(),
                prefix: None,
                source: dir.path().to_path_buf(),
                recursive: true,
                acl_for: directory_acl(true),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Configuration(_)));
        assert_eq!(put.num_calls(), 0);
    }
}
