use thiserror::Error;

/// Errors that terminate an upload run
#[derive(Error, Debug)]
pub enum UploadError {
    /// Missing or invalid parameter, missing source, unsupported source type, absent bucket
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Credentials could not be resolved or were rejected
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The transfer did not reach the completed state
    #[error("Upload error: {0}")]
    Upload(String),
}

impl UploadError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::Upload(message.into())
    }

    /// Classify an AWS SDK error raised while talking to `bucket`
    ///
    /// Rejected credentials surface as auth errors, everything else means the
    /// bucket could not be reached with the given configuration.
    pub fn from_aws_error<E: std::fmt::Display>(bucket: &str, error: E) -> Self {
        let error_str = error.to_string();
        let lower = error_str.to_lowercase();
        if lower.contains("access denied")
            || lower.contains("forbidden")
            || lower.contains("credentials")
            || lower.contains("invalidaccesskeyid")
            || lower.contains("signaturedoesnotmatch")
        {
            Self::Auth(format!("access to bucket '{}' rejected: {}", bucket, error_str))
        } else {
            Self::Configuration(format!(
                "bucket '{}' is not reachable: {}",
                bucket, error_str
            ))
        }
    }

    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            Self::Auth(_) => 3,
            Self::Upload(_) => 4,
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(_) => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Check the source path and bucket name\n  \
                     2. Verify the bucket exists: aws s3 ls s3://<bucket>\n  \
                     3. Check S3_UPLOAD_REGION matches the bucket region",
                    self
                )
            }
            Self::Auth(_) => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Check your AWS credentials: aws sts get-caller-identity\n  \
                     2. Pass both --access-key and --secret-key, or neither\n  \
                     3. Verify bucket permissions for your IAM user/role",
                    self
                )
            }
            Self::Upload(_) => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
