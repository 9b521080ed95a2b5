//! Deduplication engine.
//!
//! Resolves `image:tag` manifests into blob groups and makes sure every blob
//! of every group gets its info fetched exactly once. Blob fetches are keyed
//! by digest in a [`SingleFlight`]; a requester that finds a fetch already in
//! progress does nothing, and anything that needs the value later awaits the
//! same flight.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use regstat_registry::{BlobDigest, BlobInfo, Manifest, MetadataSource, RegistryError, RetryPolicy};

use crate::cache::MetadataCache;
use crate::error::AuditError;
use crate::group::BlobGroupKey;
use crate::index::{AuditIndex, GroupAttribution};
use crate::pool::WorkerPool;
use crate::report::AuditReport;
use crate::singleflight::SingleFlight;

/// Result of one blob-info fetch, shared by every requester of the digest.
pub type BlobFetch = Result<BlobInfo, Arc<RegistryError>>;

pub struct DedupEngine {
    source: Arc<dyn MetadataSource>,
    cache: Option<Arc<MetadataCache>>,
    retry: RetryPolicy,
    index: Mutex<AuditIndex>,
    flights: SingleFlight<BlobDigest, BlobFetch>,
}

impl DedupEngine {
    pub fn new(source: Arc<dyn MetadataSource>, retry: RetryPolicy) -> Self {
        Self {
            source,
            cache: None,
            retry,
            index: Mutex::new(AuditIndex::new()),
            flights: SingleFlight::new(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Resolve one tag and queue fetches for its unknown blobs.
    ///
    /// Returns the tag's group, or `None` if the tag disappeared between
    /// listing and resolution.
    pub async fn resolve_tag(
        self: &Arc<Self>,
        blob_pool: &WorkerPool,
        image: &str,
        tag: &str,
    ) -> Result<Option<BlobGroupKey>, AuditError> {
        let Some(manifest) = self.load_manifest(image, tag).await? else {
            return Ok(None);
        };

        let registration = {
            let mut index = self.index.lock();
            for (digest, info) in manifest.embedded_infos() {
                index.record_blob_info(digest, info);
            }
            index.register(image, tag, manifest.digests())
        };

        debug!(
            image,
            tag,
            group = %registration.key.short(),
            new_group = registration.created,
            missing = registration.missing.len(),
            "Registered tag"
        );

        for digest in registration.missing {
            self.queue_blob_fetch(blob_pool, image, digest).await?;
        }

        Ok(Some(registration.key))
    }

    /// Start a fetch for `digest` unless one is running or its info is known.
    async fn queue_blob_fetch(
        self: &Arc<Self>,
        blob_pool: &WorkerPool,
        image: &str,
        digest: BlobDigest,
    ) -> Result<(), AuditError> {
        let joined = self.flights.join_or_start(digest.clone(), || {
            if self.index.lock().has_blob_info(&digest) {
                return None;
            }
            let engine = Arc::clone(self);
            let image = image.to_string();
            let digest = digest.clone();
            Some(async move { engine.fetch_blob_info(&image, &digest).await })
        });

        let Some(joined) = joined else {
            return Ok(());
        };
        if !joined.leader {
            return Ok(());
        }

        let image = image.to_string();
        blob_pool
            .submit(format!("{image}@{digest}"), async move {
                joined
                    .flight
                    .await
                    .map(|_| ())
                    .map_err(|source| AuditError::BlobInfo {
                        image,
                        digest,
                        source,
                    })
            })
            .await
    }

    /// Manifest for `image:tag` from the cache, falling back to the source.
    ///
    /// An invalid (typically empty) manifest is fetched once more before
    /// giving up. A tag that no longer exists yields `None`.
    async fn load_manifest(&self, image: &str, tag: &str) -> Result<Option<Manifest>, AuditError> {
        if let Some(cache) = &self.cache {
            match cache.get_manifest(image, tag) {
                Ok(Some(manifest)) => return Ok(Some(manifest)),
                Ok(None) => {}
                Err(e) => warn!(image, tag, error = %e, "Manifest cache read failed"),
            }
        }

        let operation = format!("manifest {image}:{tag}");
        let source = &self.source;
        let fetch = || self.retry.run(&operation, || source.get_manifest(image, tag));

        let fetched = match fetch().await {
            Err(e) if e.is_invalid_manifest() => {
                warn!(image, tag, error = %e, "Invalid manifest, retrying once");
                fetch().await
            }
            other => other,
        };

        match fetched {
            Ok(manifest) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put_manifest(image, tag, &manifest) {
                        warn!(image, tag, error = %e, "Manifest cache write failed");
                    }
                }
                Ok(Some(manifest))
            }
            Err(e) if e.is_not_found() => {
                warn!(image, tag, "Tag vanished during scan, skipping");
                Ok(None)
            }
            Err(source) => Err(AuditError::Manifest {
                image: image.to_string(),
                tag: tag.to_string(),
                source,
            }),
        }
    }

    /// Body of a blob flight: cache, then source, then publish.
    ///
    /// The index is written before the flight completes, so once a flight is
    /// gone its value is always visible in the index.
    async fn fetch_blob_info(&self, image: &str, digest: &BlobDigest) -> BlobFetch {
        let cached = match &self.cache {
            Some(cache) => cache.get_blob_info(digest).unwrap_or_else(|e| {
                warn!(%digest, error = %e, "Blob cache read failed");
                None
            }),
            None => None,
        };

        let info = match cached {
            Some(info) => info,
            None => {
                let operation = format!("blob info {digest}");
                let info = self
                    .retry
                    .run(&operation, || self.source.get_blob_info(image, digest))
                    .await
                    .map_err(Arc::new)?;
                debug!(image, %digest, size = info.size, "Fetched blob info");

                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put_blob_info(digest, &info) {
                        warn!(%digest, error = %e, "Blob cache write failed");
                    }
                }
                info
            }
        };

        self.index.lock().record_blob_info(digest, info.clone());
        Ok(info)
    }

    /// Info for `digest`, waiting on its fetch if one is in progress.
    /// `image` names the requester in a propagated fetch error.
    pub async fn blob_info(
        &self,
        image: &str,
        digest: &BlobDigest,
    ) -> Result<BlobInfo, AuditError> {
        let known = self.index.lock().blob_info(digest).cloned();
        if let Some(info) = known {
            return Ok(info);
        }

        let flight = self.flights.get(digest);
        if let Some(flight) = flight {
            return flight.await.map_err(|source| AuditError::BlobInfo {
                image: image.to_string(),
                digest: digest.clone(),
                source,
            });
        }

        // The flight may have finished between the two lookups.
        self.index
            .lock()
            .blob_info(digest)
            .cloned()
            .ok_or_else(|| AuditError::MissingBlobInfo {
                digest: digest.clone(),
            })
    }

    /// Unique size and parent of a registered group.
    pub fn attribution(&self, key: &BlobGroupKey) -> Result<GroupAttribution, AuditError> {
        self.index.lock().attribution(key)
    }

    /// Register a resolved tag directly, bypassing the source.
    pub fn register(&self, image: &str, tag: &str, manifest: &Manifest) -> BlobGroupKey {
        let mut index = self.index.lock();
        for (digest, info) in manifest.embedded_infos() {
            index.record_blob_info(digest, info);
        }
        index.register(image, tag, manifest.digests()).key
    }

    /// Number of blob fetches still in progress.
    pub fn fetches_in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `f` against the current index.
    pub fn with_index<T>(&self, f: impl FnOnce(&AuditIndex) -> T) -> T {
        f(&self.index.lock())
    }

    /// Build the final report. Every fetch must have settled.
    pub fn report(&self) -> Result<AuditReport, AuditError> {
        AuditReport::build(&self.index.lock())
    }
}
