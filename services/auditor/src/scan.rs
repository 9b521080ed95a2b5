//! Scan driver.
//!
//! Walks the catalog and each image's tags, feeding `(image, tag)` jobs to
//! the image-tag pool. Those jobs feed blob-info jobs to the blob pool. The
//! report is built only after both pools have drained.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use regstat_registry::{MetadataSource, Pager};

use crate::cache::MetadataCache;
use crate::config::AuditConfig;
use crate::engine::DedupEngine;
use crate::error::AuditError;
use crate::pool::WorkerPool;
use crate::report::AuditReport;

pub struct Auditor {
    source: Arc<dyn MetadataSource>,
    cache: Option<Arc<MetadataCache>>,
    config: AuditConfig,
}

impl Auditor {
    pub fn new(source: Arc<dyn MetadataSource>, config: AuditConfig) -> Self {
        Self {
            source,
            cache: None,
            config,
        }
    }

    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Run a full scan and aggregate the result.
    ///
    /// Any fatal job failure aborts the scan; no partial report is returned.
    pub async fn run(&self) -> Result<AuditReport, AuditError> {
        let started = Instant::now();

        let mut engine = DedupEngine::new(Arc::clone(&self.source), self.config.retry.clone());
        if let Some(cache) = &self.cache {
            engine = engine.with_cache(Arc::clone(cache));
        }
        let engine = Arc::new(engine);

        let tag_pool = WorkerPool::new(
            "image-tag",
            self.config.image_workers,
            self.config.image_log_every,
        );
        let blob_pool = WorkerPool::new(
            "blob-info",
            self.config.blob_workers,
            self.config.blob_log_every,
        );

        info!(
            image_workers = tag_pool.concurrency(),
            blob_workers = blob_pool.concurrency(),
            max_images = ?self.config.max_images,
            "Starting registry scan"
        );

        let submitted = self.submit_tags(&engine, &tag_pool, &blob_pool).await;

        // Tag jobs are the only producers of blob jobs, so the tag pool
        // drains first.
        let tags = tag_pool.join().await;
        let blobs = blob_pool.join().await;
        root_cause([submitted, tags, blobs])?;

        let report = engine.report()?;
        info!(
            images = report.images.len(),
            groups = report.groups.len(),
            blobs = report.blob_count,
            total_size = report.total_size,
            tag_jobs = tag_pool.completed(),
            blob_jobs = blob_pool.completed(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Registry scan complete"
        );
        Ok(report)
    }

    async fn submit_tags(
        &self,
        engine: &Arc<DedupEngine>,
        tag_pool: &WorkerPool,
        blob_pool: &WorkerPool,
    ) -> Result<(), AuditError> {
        let page_size = self.config.page_size;
        let mut catalog = Pager::catalog(Arc::clone(&self.source), page_size)
            .with_retry(self.config.retry.clone());

        let mut scanned = 0usize;
        while let Some(image) = catalog
            .next()
            .await
            .map_err(|e| AuditError::listing("catalog", e))?
        {
            if self.config.max_images.is_some_and(|max| scanned >= max) {
                info!(scanned, "Image limit reached, stopping catalog walk");
                break;
            }
            scanned += 1;

            let mut tags = Pager::tags(Arc::clone(&self.source), image.clone(), page_size)
                .with_retry(self.config.retry.clone());
            let mut tag_count = 0usize;

            while let Some(tag) = tags
                .next()
                .await
                .map_err(|e| AuditError::listing(format!("tags of {image}"), e))?
            {
                tag_count += 1;
                let engine = Arc::clone(engine);
                let blob_pool = blob_pool.clone();
                let job_image = image.clone();
                tag_pool
                    .submit(format!("{image}:{tag}"), async move {
                        engine
                            .resolve_tag(&blob_pool, &job_image, &tag)
                            .await
                            .map(|_| ())
                    })
                    .await?;
            }

            if tag_count == 0 {
                warn!(image = %image, "Image has no tags");
            }
        }

        info!(images = scanned, "Catalog walk finished");
        Ok(())
    }
}

/// First failure that is not just a consequence of another pool aborting.
fn root_cause(results: [Result<(), AuditError>; 3]) -> Result<(), AuditError> {
    let mut fallback = None;
    for result in results {
        match result {
            Ok(()) => {}
            Err(AuditError::PoolAborted { pool }) => {
                fallback.get_or_insert(AuditError::PoolAborted { pool });
            }
            Err(err) => return Err(err),
        }
    }
    match fallback {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
