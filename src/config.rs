use std::env;
use std::path::PathBuf;

use crate::error::{Result, UploadError};

/// Region used when neither the CLI nor the environment names one
pub const DEFAULT_REGION: &str = "ap-northeast-2";

/// Default number of objects uploaded in parallel for a directory transfer
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

const ENV_PREFIX: &str = "S3_UPLOAD_";

/// Raw invocation parameters as given on the command line
///
/// Every field is optional here; unset fields fall back to `S3_UPLOAD_*`
/// environment variables and then to defaults in [`UploadRequest::from_parameters`].
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub do_not_upload: Option<bool>,
    pub source: Option<PathBuf>,
    pub bucket_name: Option<String>,
    pub destination: Option<String>,
    pub recursive: Option<bool>,
    pub make_public: Option<bool>,
    pub max_concurrent: Option<usize>,
}

/// A fully resolved and validated upload request
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: String,
    pub source: PathBuf,
    pub bucket_name: String,
    pub destination: Option<String>,
    pub recursive: bool,
    pub make_public: bool,
    pub dry_run: bool,
    pub max_concurrent: usize,
}

impl UploadRequest {
    /// Resolve parameters against the process environment and `.env` file
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a required parameter is missing or invalid
    pub fn from_env(params: Parameters) -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists
        Self::from_parameters(params, |name| env::var(name).ok())
    }

    /// Resolve parameters, consulting `lookup` for anything the CLI left unset
    pub fn from_parameters<F>(params: Parameters, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |value: Option<String>, name: &str| {
            value
                .or_else(|| lookup(&format!("{}{}", ENV_PREFIX, name)))
                .filter(|v| !v.trim().is_empty())
        };
        let flag = |value: Option<bool>, name: &str, default: bool| -> Result<bool> {
            match value {
                Some(v) => Ok(v),
                None => match lookup(&format!("{}{}", ENV_PREFIX, name)) {
                    Some(raw) if !raw.trim().is_empty() => parse_bool(&raw).ok_or_else(|| {
                        UploadError::configuration(format!(
                            "{}{} '{}' is not a boolean (use true/false)",
                            ENV_PREFIX, name, raw
                        ))
                    }),
                    _ => Ok(default),
                },
            }
        };

        let access_key = text(params.access_key, "ACCESS_KEY");
        let secret_key = text(params.secret_key, "SECRET_KEY");

        let region = text(params.region, "REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self::validate_region(&region)?;

        let source = params
            .source
            .or_else(|| text(None, "SOURCE").map(PathBuf::from))
            .ok_or_else(|| {
                UploadError::configuration(
                    "source is required (pass SOURCE or set S3_UPLOAD_SOURCE)",
                )
            })?;

        let bucket_name = text(params.bucket_name, "BUCKET_NAME").ok_or_else(|| {
            UploadError::configuration(
                "bucket name is required (pass --bucket-name or set S3_UPLOAD_BUCKET_NAME)",
            )
        })?;
        Self::validate_bucket_name(&bucket_name)?;

        let destination = match text(params.destination, "DESTINATION") {
            Some(destination) => {
                Self::validate_destination(&destination)?;
                Some(destination.trim_end_matches('/').to_string()).filter(|d| !d.is_empty())
            }
            None => None,
        };

        let max_concurrent = match params.max_concurrent {
            Some(n) => n,
            None => match text(None, "MAX_CONCURRENT") {
                Some(raw) => raw.trim().parse().map_err(|_| {
                    UploadError::configuration(format!(
                        "S3_UPLOAD_MAX_CONCURRENT '{}' is not a number",
                        raw
                    ))
                })?,
                None => DEFAULT_MAX_CONCURRENT,
            },
        };
        if max_concurrent == 0 {
            return Err(UploadError::configuration(
                "max concurrent uploads must be at least 1",
            ));
        }

        Ok(Self {
            access_key,
            secret_key,
            region,
            source,
            bucket_name,
            destination,
            recursive: flag(params.recursive, "RECURSIVE", false)?,
            make_public: flag(params.make_public, "MAKE_PUBLIC", true)?,
            dry_run: flag(params.do_not_upload, "DO_NOT_UPLOAD", false)?,
            max_concurrent,
        })
    }

    /// Destination prefix, empty when none was given
    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or("")
    }

    /// Validate AWS region format
    fn validate_region(region: &str) -> Result<()> {
        // Basic validation - ensure it looks like a region (contains a dash)
        if !region.contains('-') {
            return Err(UploadError::configuration(format!(
                "region '{}' doesn't look like a valid region (e.g., us-west-2, ap-northeast-2)",
                region
            )));
        }

        if !region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(UploadError::configuration(format!(
                "region '{}' may only contain lowercase letters, digits and dashes",
                region
            )));
        }

        Ok(())
    }

    /// Validate S3 bucket name according to AWS rules
    fn validate_bucket_name(bucket: &str) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(UploadError::configuration(reason)) };

        if bucket.len() < 3 || bucket.len() > 63 {
            return invalid(format!(
                "bucket name '{}' must be between 3 and 63 characters (got {})",
                bucket,
                bucket.len()
            ));
        }

        let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        if !bucket.starts_with(alnum) || !bucket.ends_with(alnum) {
            return invalid(format!(
                "bucket name '{}' must start and end with a lowercase letter or number",
                bucket
            ));
        }

        if let Some(c) = bucket.chars().find(|c| !alnum(*c) && *c != '-' && *c != '.') {
            return invalid(format!(
                "bucket name '{}' contains invalid character '{}'",
                bucket, c
            ));
        }

        if bucket.contains("..") {
            return invalid(format!(
                "bucket name '{}' cannot contain consecutive periods",
                bucket
            ));
        }

        if bucket.split('.').count() == 4 && bucket.split('.').all(|p| p.parse::<u8>().is_ok()) {
            return invalid(format!(
                "bucket name '{}' cannot be formatted as an IP address",
                bucket
            ));
        }

        Ok(())
    }

    /// Validate the destination key prefix
    fn validate_destination(path: &str) -> Result<()> {
        if path.contains("//") {
            return Err(UploadError::configuration(format!(
                "destination '{}' contains consecutive slashes (not allowed)",
                path
            )));
        }

        if path.split('/').any(|segment| segment == "..") {
            return Err(UploadError::configuration(format!(
                "destination '{}' contains '..' (not allowed)",
                path
            )));
        }

        if path.starts_with('/') {
            return Err(UploadError::configuration(format!(
                "destination '{}' should not start with '/' (use a relative prefix)",
                path
            )));
        }

        Ok(())
    }
}

/// Parse a boolean parameter value the way build tools spell them
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(params: Parameters, env: &[(&str, &str)]) -> Result<UploadRequest> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        UploadRequest::from_parameters(params, |name| env.get(name).cloned())
    }

    fn minimal() -> Parameters {
        Parameters {
            source: Some(PathBuf::from("target/site")),
            bucket_name: Some("my-bucket".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let request = resolve(minimal(), &[]).unwrap();

        assert_eq!(request.region, DEFAULT_REGION);
        assert_eq!(request.destination, None);
        assert_eq!(request.destination(), "");
        assert!(!request.recursive);
        assert!(request.make_public);
        assert!(!request.dry_run);
        assert_eq!(request.max_concurrent, DEFAULT_MAX_CONCURRENT);
        assert_eq!(request.access_key, None);
    }

    #[test]
    fn test_env_fallback() {
        let request = resolve(
            Parameters::default(),
            &[
                ("S3_UPLOAD_SOURCE", "dist"),
                ("S3_UPLOAD_BUCKET_NAME", "env-bucket"),
                ("S3_UPLOAD_REGION", "eu-west-1"),
                ("S3_UPLOAD_DESTINATION", "releases/1.0/"),
                ("S3_UPLOAD_RECURSIVE", "yes"),
                ("S3_UPLOAD_MAKE_PUBLIC", "false"),
                ("S3_UPLOAD_DO_NOT_UPLOAD", "1"),
                ("S3_UPLOAD_ACCESS_KEY", "AKIA"),
                ("S3_UPLOAD_SECRET_KEY", "secret"),
            ],
        )
        .unwrap();

        assert_eq!(request.source, PathBuf::from("dist"));
        assert_eq!(request.bucket_name, "env-bucket");
        assert_eq!(request.region, "eu-west-1");
        assert_eq!(request.destination(), "releases/1.0");
        assert!(request.recursive);
        assert!(!request.make_public);
        assert!(request.dry_run);
        assert_eq!(request.access_key.as_deref(), Some("AKIA"));
        assert_eq!(request.secret_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_cli_overrides_env() {
        let params = Parameters {
            region: Some("us-west-2".to_string()),
            make_public: Some(true),
            ..minimal()
        };
        let request = resolve(
            params,
            &[
                ("S3_UPLOAD_REGION", "eu-west-1"),
                ("S3_UPLOAD_MAKE_PUBLIC", "false"),
            ],
        )
        .unwrap();

        assert_eq!(request.region, "us-west-2");
        assert!(request.make_public);
    }

    #[test]
    fn test_missing_required_parameters() {
        let err = resolve(Parameters::default(), &[]).unwrap_err();
        assert!(matches!(err, UploadError::Configuration(_)));
        assert!(err.to_string().contains("source"));

        let params = Parameters {
            bucket_name: None,
            ..minimal()
        };
        let err = resolve(params, &[]).unwrap_err();
        assert!(err.to_string().contains("bucket name"));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let params = Parameters {
            access_key: Some(String::new()),
            destination: Some(String::new()),
            ..minimal()
        };
        let request = resolve(params, &[("S3_UPLOAD_SECRET_KEY", "  ")]).unwrap();

        assert_eq!(request.access_key, None);
        assert_eq!(request.secret_key, None);
        assert_eq!(request.destination, None);
    }

    #[test]
    fn test_invalid_boolean_env() {
        let err = resolve(minimal(), &[("S3_UPLOAD_RECURSIVE", "maybe")]).unwrap_err();
        assert!(matches!(err, UploadError::Configuration(_)));
        assert!(err.to_string().contains("S3_UPLOAD_RECURSIVE"));
    }

    #[test]
    fn test_max_concurrent_validation() {
        let params = Parameters {
            max_concurrent: Some(0),
            ..minimal()
        };
        assert!(resolve(params, &[]).is_err());

        let request = resolve(minimal(), &[("S3_UPLOAD_MAX_CONCURRENT", "8")]).unwrap();
        assert_eq!(request.max_concurrent, 8);

        assert!(resolve(minimal(), &[("S3_UPLOAD_MAX_CONCURRENT", "many")]).is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" on "), Some(true));
        assert_eq!(parse_bool("No"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("sometimes"), None);
    }

    #[test]
    fn test_bucket_name_validation() {
        // Valid bucket names
        assert!(UploadRequest::validate_bucket_name("my-bucket").is_ok());
        assert!(UploadRequest::validate_bucket_name("my.bucket.123").is_ok());
        assert!(UploadRequest::validate_bucket_name("abc").is_ok());

        // Invalid bucket names
        assert!(UploadRequest::validate_bucket_name("ab").is_err()); // Too short
        assert!(UploadRequest::validate_bucket_name(&"a".repeat(64)).is_err()); // Too long
        assert!(UploadRequest::validate_bucket_name("MY-BUCKET").is_err()); // Uppercase
        assert!(UploadRequest::validate_bucket_name("my_bucket").is_err()); // Underscore
        assert!(UploadRequest::validate_bucket_name("-mybucket").is_err());
        assert!(UploadRequest::validate_bucket_name("mybucket-").is_err());
        assert!(UploadRequest::validate_bucket_name("my..bucket").is_err());
        assert!(UploadRequest::validate_bucket_name("192.168.1.1").is_err()); // IP address format
    }

    #[test]
    fn test_region_validation() {
        assert!(UploadRequest::validate_region("ap-northeast-2").is_ok());
        assert!(UploadRequest::validate_region("us-gov-west-1").is_ok());

        assert!(UploadRequest::validate_region("uswest2").is_err()); // No dash
        assert!(UploadRequest::validate_region("US-WEST-2").is_err());
    }

    #[test]
    fn test_destination_validation() {
        assert!(UploadRequest::validate_destination("reports").is_ok());
        assert!(UploadRequest::validate_destination("site/v1.2..3").is_ok());
        assert!(UploadRequest::validate_destination("reports/2024/").is_ok());

        assert!(UploadRequest::validate_destination("reports//2024").is_err());
        assert!(UploadRequest::validate_destination("../reports").is_err());
        assert!(UploadRequest::validate_destination("/reports").is_err());
    }
}
