use std::future::Future;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::UploadRequest;
use crate::error::{Result, UploadError};
use crate::s3::{
    ClientSettings, CredentialSource, DirectoryUpload, ObjectUpload, StorageService,
    TransferOutcome, directory_acl, object_acl, resolve_credentials,
};

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Everything was validated but nothing was written
    DryRun,
    Uploaded {
        location: String,
        outcome: TransferOutcome,
    },
}

/// Validates an [`UploadRequest`] and drives it through a [`StorageService`]
pub struct Uploader {
    request: UploadRequest,
}

impl Uploader {
    pub fn new(request: UploadRequest) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &UploadRequest {
        &self.request
    }

    /// Fail unless the source exists on disk
    pub fn validate(&self) -> Result<()> {
        if !self.request.source.exists() {
            return Err(UploadError::configuration(format!(
                "File/folder doesn't exist: {}",
                self.request.source.display()
            )));
        }
        Ok(())
    }

    /// Credentials and region the storage client should be built with
    pub fn client_settings(&self) -> ClientSettings {
        let access_key = self.request.access_key.as_deref();
        let secret_key = self.request.secret_key.as_deref();
        let credentials = resolve_credentials(access_key, secret_key);

        if credentials == CredentialSource::DefaultChain
            && (access_key.is_some() || secret_key.is_some())
        {
            warn!("Only one of access key / secret key given, using the default credential chain");
        }

        ClientSettings {
            credentials,
            region: self.request.region.clone(),
        }
    }

    pub async fn check_bucket<S>(&self, storage: &S) -> Result<()>
    where
        S: StorageService + ?Sized,
    {
        if !storage.bucket_exists(&self.request.bucket_name).await? {
            return Err(UploadError::configuration(format!(
                "Bucket doesn't exist: {}",
                self.request.bucket_name
            )));
        }
        Ok(())
    }

    /// Validate, connect, check the bucket, then upload unless this is a dry run
    ///
    /// `connect` is only called once the source has been validated. Resolving
    /// `interrupt` while the transfer is in flight cancels it and fails the run.
    pub async fn run<S, C, Fut, I>(&self, connect: C, interrupt: I) -> Result<RunOutcome>
    where
        S: StorageService,
        C: FnOnce(ClientSettings) -> Fut,
        Fut: Future<Output = Result<S>>,
        I: Future<Output = ()>,
    {
        self.validate()?;

        let storage = connect(self.client_settings()).await?;

        self.check_bucket(&storage).await?;

        if self.request.dry_run {
            info!(
                "File {} would have been uploaded to s3://{}/{} (dry run)",
                self.request.source.display(),
                self.request.bucket_name,
                self.request.destination()
            );
            return Ok(RunOutcome::DryRun);
        }

        let outcome = self.upload(&storage, interrupt).await?;
        if !outcome.is_completed() {
            return Err(UploadError::upload("Unable to upload file to S3."));
        }

        let location = self.location();
        info!(
            "File {} uploaded to {}",
            self.request.source.display(),
            location
        );

        Ok(RunOutcome::Uploaded { location, outcome })
    }

    /// Submit the transfer for the source and wait for it
    ///
    /// Only configuration problems are returned as errors; a transfer that
    /// fails, is canceled or whose wait is interrupted yields an outcome that
    /// is not completed.
    pub async fn upload<S, I>(&self, storage: &S, interrupt: I) -> Result<TransferOutcome>
    where
        S: StorageService + ?Sized,
        I: Future<Output = ()>,
    {
        let source = &self.request.source;
        let metadata = std::fs::metadata(source).map_err(|e| {
            UploadError::configuration(format!("Cannot read {}: {}", source.display(), e))
        })?;

        let transfer = if metadata.is_file() {
            let request = ObjectUpload {
                bucket: self.request.bucket_name.clone(),
                key: self.object_key(source)?,
                source: source.clone(),
                acl: object_acl(self.request.make_public),
            };
            debug!("Submitting s3://{}/{} ({})", request.bucket, request.key, request.acl);
            storage.upload_object(request).await?
        } else if metadata.is_dir() {
            let request = DirectoryUpload {
                bucket: self.request.bucket_name.clone(),
                prefix: self.request.destination.clone(),
                source: source.clone(),
                recursive: self.request.recursive,
                acl_for: directory_acl(self.request.make_public),
            };
            storage.upload_directory(request).await?
        } else {
            return Err(UploadError::configuration(format!(
                "File is neither a regular file nor a directory {}",
                source.display()
            )));
        };

        debug!("Transferring {} bytes...", transfer.total_bytes());
        match transfer.wait_for_completion(interrupt).await {
            Ok(_) => info!("Transferred {} bytes.", transfer.bytes_transferred()),
            Err(e) => warn!(
                "{} after {} of {} bytes",
                e,
                transfer.bytes_transferred(),
                transfer.total_bytes()
            ),
        }

        Ok(transfer.outcome())
    }

    /// Object key for a single file upload
    pub fn object_key(&self, file: &Path) -> Result<String> {
        let name = file.file_name().ok_or_else(|| {
            UploadError::configuration(format!("{} has no file name", file.display()))
        })?;
        let name = name.to_string_lossy();

        Ok(match self.request.destination() {
            "" => name.into_owned(),
            destination => format!("{}/{}", destination, name),
        })
    }

    /// Where the upload lands, as reported to the user
    pub fn location(&self) -> String {
        match self.request.destination() {
            "" => format!("s3://{}", self.request.bucket_name),
            destination => format!("s3://{}/{}", self.request.bucket_name, destination),
        }
    }
}
