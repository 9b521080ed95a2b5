//! Audit errors.

use std::sync::Arc;

use regstat_registry::{BlobDigest, RegistryError};
use thiserror::Error;

/// Errors that abort an audit.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to list {listing}: {source}")]
    Listing {
        listing: String,
        #[source]
        source: RegistryError,
    },

    #[error("failed to resolve manifest {image}:{tag}: {source}")]
    Manifest {
        image: String,
        tag: String,
        #[source]
        source: RegistryError,
    },

    /// Shared by every requester of the same digest.
    #[error("failed to fetch blob info for {digest} (image {image}): {source}")]
    BlobInfo {
        image: String,
        digest: BlobDigest,
        #[source]
        source: Arc<RegistryError>,
    },

    /// A registered blob still has no info after every fetch settled.
    /// This indicates a bug in fetch deduplication.
    #[error("blob {digest} has no info after all fetches completed")]
    MissingBlobInfo { digest: BlobDigest },

    #[error("blob group {0} is not registered")]
    UnknownGroup(String),

    #[error("{pool} pool aborted after an earlier job failure")]
    PoolAborted { pool: String },

    #[error("job {job} in {pool} pool panicked")]
    JobPanicked { pool: String, job: String },
}

impl AuditError {
    pub(crate) fn listing(listing: impl Into<String>, source: RegistryError) -> Self {
        Self::Listing {
            listing: listing.into(),
            source,
        }
    }
}
