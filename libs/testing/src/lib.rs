//! Test fixtures shared across the workspace.
//!
//! [`StubSource`] is an in-memory [`MetadataSource`] that records every call,
//! so tests can assert how often (and how concurrently) the auditor hits the
//! registry.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;

use regstat_registry::{
    BlobDigest, BlobInfo, Layer, Manifest, MetadataSource, Page, RegistryError,
};

/// In-memory registry with call counters and fault injection.
#[derive(Default)]
pub struct StubSource {
    /// image -> tag -> base-first digests.
    images: BTreeMap<String, BTreeMap<String, Vec<String>>>,
    sizes: HashMap<String, u64>,
    embed_sizes: bool,
    catalog_missing: bool,
    blob_delay: Option<Duration>,
    failing_blobs: HashSet<String>,
    empty_manifests_once: Mutex<HashSet<(String, String)>>,
    transient_manifest_failures: AtomicUsize,

    blob_calls: Mutex<HashMap<String, usize>>,
    manifest_calls: AtomicUsize,
    page_calls: AtomicUsize,
    blobs_in_flight: AtomicUsize,
    max_blobs_in_flight: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `image:tag` with base-first layer digests.
    pub fn with_tag(mut self, image: &str, tag: &str, layers: &[&str]) -> Self {
        self.images
            .entry(image.to_string())
            .or_default()
            .insert(tag.to_string(), layers.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Register a repository with no tags.
    pub fn with_image(mut self, image: &str) -> Self {
        self.images.entry(image.to_string()).or_default();
        self
    }

    pub fn with_blob(mut self, digest: &str, size: u64) -> Self {
        self.sizes.insert(digest.to_string(), size);
        self
    }

    /// Serve schema 2 manifests with embedded layer sizes.
    pub fn with_embedded_sizes(mut self) -> Self {
        self.embed_sizes = true;
        self
    }

    /// The catalog endpoint answers 404, as behind a wrong registry prefix.
    pub fn with_missing_catalog(mut self) -> Self {
        self.catalog_missing = true;
        self
    }

    /// Sleep inside every blob fetch, widening race windows.
    pub fn with_blob_delay(mut self, delay: Duration) -> Self {
        self.blob_delay = Some(delay);
        self
    }

    /// Blob fetches for `digest` fail permanently.
    pub fn with_failing_blob(mut self, digest: &str) -> Self {
        self.failing_blobs.insert(digest.to_string());
        self
    }

    /// First manifest fetch for `image:tag` returns an empty body.
    pub fn with_empty_manifest_once(self, image: &str, tag: &str) -> Self {
        self.empty_manifests_once
            .lock()
            .insert((image.to_string(), tag.to_string()));
        self
    }

    /// The next `count` manifest fetches fail with a 503.
    pub fn with_transient_manifest_failures(self, count: usize) -> Self {
        self.transient_manifest_failures
            .store(count, Ordering::SeqCst);
        self
    }

    /// Number of `get_blob_info` calls for `digest`.
    pub fn blob_fetches(&self, digest: &str) -> usize {
        self.blob_calls.lock().get(digest).copied().unwrap_or(0)
    }

    /// Number of `get_blob_info` calls across all digests.
    pub fn total_blob_fetches(&self) -> usize {
        self.blob_calls.lock().values().sum()
    }

    /// Highest number of simultaneously running blob fetches.
    pub fn max_concurrent_blob_fetches(&self) -> usize {
        self.max_blobs_in_flight.load(Ordering::SeqCst)
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifest_calls.load(Ordering::SeqCst)
    }

    pub fn page_fetches(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    fn page_of(&self, items: Vec<String>, page_size: usize, cursor: Option<&str>) -> Page {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + page_size.max(1)).min(items.len());
        let next = (end < items.len()).then(|| end.to_string());
        Page::new(items.get(start..end).unwrap_or_default().to_vec(), next)
    }
}

#[async_trait]
impl MetadataSource for StubSource {
    async fn catalog_page(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError> {
        if self.catalog_missing {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            return Err(RegistryError::Status {
                status: StatusCode::NOT_FOUND,
                url: "stub:///v2/_catalog".to_string(),
            });
        }
        let names = self.images.keys().cloned().collect();
        Ok(self.page_of(names, page_size, cursor))
    }

    async fn tags_page(
        &self,
        image: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError> {
        let tags = self.images.get(image).ok_or_else(|| RegistryError::Api {
            code: "NAME_UNKNOWN".to_string(),
            message: format!("repository {image} not known to registry"),
        })?;
        Ok(self.page_of(tags.keys().cloned().collect(), page_size, cursor))
    }

    async fn get_manifest(&self, image: &str, tag: &str) -> Result<Manifest, RegistryError> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        let reference = format!("{image}:{tag}");

        if self
            .transient_manifest_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RegistryError::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                url: format!("stub:///v2/{image}/manifests/{tag}"),
            });
        }

        if self
            .empty_manifests_once
            .lock()
            .remove(&(image.to_string(), tag.to_string()))
        {
            return Manifest::parse(&reference, b"");
        }

        let layers = self
            .images
            .get(image)
            .and_then(|tags| tags.get(tag))
            .ok_or_else(|| RegistryError::NotFound(reference))?;

        Ok(Manifest {
            layers: layers
                .iter()
                .map(|digest| Layer {
                    digest: BlobDigest::new(digest.as_str()),
                    size: if self.embed_sizes {
                        self.sizes.get(digest).copied()
                    } else {
                        None
                    },
                })
                .collect(),
        })
    }

    async fn get_blob_info(
        &self,
        _image: &str,
        digest: &BlobDigest,
    ) -> Result<BlobInfo, RegistryError> {
        *self
            .blob_calls
            .lock()
            .entry(digest.to_string())
            .or_default() += 1;

        let running = self.blobs_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_blobs_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.blob_delay {
            tokio::time::sleep(delay).await;
        }
        self.blobs_in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_blobs.contains(digest.as_str()) {
            return Err(RegistryError::NotFound(digest.to_string()));
        }

        let size = self
            .sizes
            .get(digest.as_str())
            .copied()
            .ok_or_else(|| RegistryError::NotFound(digest.to_string()))?;

        Ok(BlobInfo {
            size,
            modified_at: Utc.timestamp_opt(1_600_000_000, 0).single(),
            location: None,
        })
    }
}

/// Stub for the scenario: `app:v1 = [base]`, `app:v2 = [base, layerX]`,
/// sizes `base = 100`, `layerX = 50`.
pub fn base_and_child() -> StubSource {
    StubSource::new()
        .with_tag("app", "v1", &["sha256:base"])
        .with_tag("app", "v2", &["sha256:base", "sha256:layerX"])
        .with_blob("sha256:base", 100)
        .with_blob("sha256:layerX", 50)
}
