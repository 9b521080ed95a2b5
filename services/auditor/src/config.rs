//! Audit configuration.

use regstat_registry::{RetryPolicy, DEFAULT_PAGE_SIZE};

/// Tunables for one audit run.
#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Items requested per catalog/tag page.
    pub page_size: usize,

    /// Concurrent image-tag (manifest) jobs.
    pub image_workers: usize,

    /// Concurrent blob-info jobs.
    pub blob_workers: usize,

    /// Stop enumerating the catalog after this many images.
    pub max_images: Option<usize>,

    /// Retry policy for pages, manifests and blob info.
    pub retry: RetryPolicy,

    /// Log image-tag pool progress every N completed jobs.
    pub image_log_every: u64,

    /// Log blob pool progress every N completed jobs.
    pub blob_log_every: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            image_workers: 100,
            blob_workers: 100,
            max_images: None,
            retry: RetryPolicy::default(),
            image_log_every: 10,
            blob_log_every: 250,
        }
    }
}
