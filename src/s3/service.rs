use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

use super::acl::{AclProvider, CannedAcl};
use super::transfer::Transfer;
use crate::error::Result;

/// A single local file to be written as one object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectUpload {
    pub bucket: String,
    pub key: String,
    pub source: PathBuf,
    pub acl: CannedAcl,
}

/// A local directory to be written under a key prefix
#[derive(Clone)]
pub struct DirectoryUpload {
    pub bucket: String,
    /// Key prefix; objects land at `prefix/<relative path>` or at the bare relative path
    pub prefix: Option<String>,
    pub source: PathBuf,
    pub recursive: bool,
    /// Evaluated once per discovered file
    pub acl_for: AclProvider,
}

impl fmt::Debug for DirectoryUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryUpload")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("source", &self.source)
            .field("recursive", &self.recursive)
            .finish_non_exhaustive()
    }
}

/// Object-storage operations the uploader depends on
///
/// Uploads return as soon as the transfer is submitted; callers wait on the
/// returned [`Transfer`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Whether `bucket` exists and is visible to the resolved credentials
    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn upload_object(&self, request: ObjectUpload) -> Result<Transfer>;

    async fn upload_directory(&self, request: DirectoryUpload) -> Result<Transfer>;
}
