use aws_sdk_s3::types::ObjectCannedAcl;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Canned access-control policy applied to an uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannedAcl {
    BucketOwnerFullControl,
    PublicRead,
}

impl CannedAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BucketOwnerFullControl => "bucket-owner-full-control",
            Self::PublicRead => "public-read",
        }
    }
}

impl fmt::Display for CannedAcl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CannedAcl> for ObjectCannedAcl {
    fn from(acl: CannedAcl) -> Self {
        match acl {
            CannedAcl::BucketOwnerFullControl => ObjectCannedAcl::BucketOwnerFullControl,
            CannedAcl::PublicRead => ObjectCannedAcl::PublicRead,
        }
    }
}

/// Per-object policy consulted once for every file of a directory transfer
pub type AclProvider = Arc<dyn Fn(&Path) -> CannedAcl + Send + Sync>;

/// Policy for a single object: owner full control unless it should be public
pub fn object_acl(make_public: bool) -> CannedAcl {
    let mut acl = CannedAcl::BucketOwnerFullControl;
    if make_public {
        acl = CannedAcl::PublicRead;
    }
    acl
}

/// Policy function for directory uploads
pub fn directory_acl(make_public: bool) -> AclProvider {
    Arc::new(move |_path: &Path| object_acl(make_public))
}
