//! Shared registry metadata types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content hash identifying an immutable blob (e.g. `sha256:abc...`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobDigest(String);

impl BlobDigest {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(algorithm, hex)`; digests without a prefix report `sha256`.
    pub fn split(&self) -> (&str, &str) {
        self.0.split_once(':').unwrap_or(("sha256", self.0.as_str()))
    }
}

impl fmt::Display for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlobDigest {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BlobDigest {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Where the backing storage keeps a blob, when the source can tell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendLocation {
    /// Object-store region, if encoded in the endpoint host.
    #[serde(default)]
    pub region: Option<String>,
    /// Bucket (or storage root) holding the blob.
    pub bucket: String,
    /// Key of the blob data within the bucket.
    pub key: String,
}

impl BackendLocation {
    /// Parse an S3-style redirect target.
    ///
    /// Accepts both `s3-<region>.amazonaws.com` and `s3.<region>.amazonaws.com`
    /// path-style hosts; anything else yields `None`.
    pub fn from_s3_url(url: &reqwest::Url) -> Option<Self> {
        let host = url.host_str()?;
        let rest = host.strip_suffix(".amazonaws.com")?;
        let region = rest
            .strip_prefix("s3-")
            .or_else(|| rest.strip_prefix("s3."))?
            .split('.')
            .next()?;

        let (bucket, key) = url.path().trim_start_matches('/').split_once('/')?;
        if bucket.is_empty() || key.is_empty() {
            return None;
        }

        Some(Self {
            region: Some(region.to_string()),
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Size and age of one blob. Immutable once observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Stored size in bytes.
    pub size: u64,
    /// Last modification time, when the source reports one.
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    /// Backend location, when the registry redirects to object storage.
    #[serde(default)]
    pub location: Option<BackendLocation>,
}

impl BlobInfo {
    /// Info for a blob whose size was embedded in its manifest.
    pub fn from_manifest_size(size: u64) -> Self {
        Self {
            size,
            modified_at: None,
            location: None,
        }
    }
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// Items in source order.
    pub items: Vec<String>,
    /// Opaque continuation cursor for the next page.
    pub next: Option<String>,
}

impl Page {
    pub fn new(items: Vec<String>, next: Option<String>) -> Self {
        Self { items, next }
    }
}
