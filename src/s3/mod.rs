pub mod acl;
pub mod client;
pub mod helpers;
pub mod multipart;
pub mod service;
pub mod transfer;
pub mod upload;

pub use acl::{AclProvider, CannedAcl, directory_acl, object_acl};
pub use client::{ClientSettings, CredentialSource, S3Client, TransferOptions, resolve_credentials};
#[cfg(test)]
pub use service::MockStorageService;
pub use service::{DirectoryUpload, ObjectUpload, StorageService};
pub use transfer::{Interrupted, Transfer, TransferOutcome, TransferReporter, TransferState};
