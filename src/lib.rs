//! Upload a local file or directory to an S3 bucket as a build pipeline step.
//!
//! [`Uploader`] validates an [`UploadRequest`], connects to S3, checks that the
//! bucket exists and then submits a single-object or directory transfer,
//! applying a canned ACL to every object written.

pub mod config;
pub mod error;
pub mod s3;
pub mod uploader;

pub use config::{Parameters, UploadRequest};
pub use error::{Result, UploadError};
pub use uploader::{RunOutcome, Uploader};
