//! End-to-end scans against the in-memory stub registry.
//!
//! These tests drive the full pipeline (pagers, both pools, the engine and
//! report aggregation) and use the stub's call counters to check that each
//! blob is fetched once no matter how many tags share it.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use regstat_auditor::{AuditConfig, AuditError, Auditor, MetadataCache, ROOT};
use regstat_registry::{BackoffPolicy, Pager, RetryPolicy};
use regstat_testing::{base_and_child, StubSource};

fn config() -> AuditConfig {
    AuditConfig {
        page_size: 2,
        image_workers: 4,
        blob_workers: 3,
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy {
                base: Duration::from_millis(1),
                max: Duration::from_millis(5),
                jitter: 0.0,
            },
        },
        ..AuditConfig::default()
    }
}

fn auditor(source: &Arc<StubSource>) -> Auditor {
    Auditor::new(source.clone(), config())
}

#[tokio::test]
async fn test_base_image_and_child() {
    let source = Arc::new(base_and_child());
    let report = auditor(&source).run().await.unwrap();

    assert_eq!(report.groups.len(), 2);
    assert_eq!(report.total_size, 150);
    assert_eq!(report.blob_count, 2);

    let v1 = report.groups.iter().find(|g| g.label == "app:v1").unwrap();
    assert_eq!(v1.unique_size, 100);
    assert_eq!(v1.parent, None);

    let v2 = report.groups.iter().find(|g| g.label == "app:v2").unwrap();
    assert_eq!(v2.unique_size, 50);
    assert_eq!(v2.parent.as_deref(), Some("app:v1"));

    let root = report.rows.iter().find(|r| r.name == ROOT).unwrap();
    assert_eq!((root.parent.as_deref(), root.size), (None, 150));

    let app = report.image("app").unwrap();
    assert_eq!((app.tags, app.groups, app.unique_size), (2, 2, 150));
}

#[tokio::test]
async fn test_shared_blobs_fetched_once_under_fan_out() {
    let mut stub = StubSource::new()
        .with_blob("sha256:os", 1000)
        .with_blob("sha256:runtime", 300)
        .with_blob_delay(Duration::from_millis(10));
    for i in 0..12 {
        let image = format!("svc-{i:02}");
        let own = format!("sha256:own-{i}");
        stub = stub
            .with_blob(&own, 10)
            .with_tag(&image, "base", &["sha256:os", "sha256:runtime"])
            .with_tag(&image, "latest", &["sha256:os", "sha256:runtime", &own]);
    }
    let source = Arc::new(stub);

    let report = auditor(&source).run().await.unwrap();

    assert_eq!(source.blob_fetches("sha256:os"), 1);
    assert_eq!(source.blob_fetches("sha256:runtime"), 1);
    assert_eq!(source.total_blob_fetches(), 14);
    assert!(source.max_concurrent_blob_fetches() <= 3);

    assert_eq!(report.total_size, 1000 + 300 + 12 * 10);
    // One shared base group plus one leaf group per service.
    assert_eq!(report.groups.len(), 13);
    for image in &report.images {
        assert_eq!(image.unique_size, 1300 + 10, "{}", image.name);
    }
}

#[tokio::test]
async fn test_same_layers_across_images_share_a_group() {
    let source = Arc::new(
        StubSource::new()
            .with_tag("app", "v1", &["sha256:a", "sha256:b"])
            .with_tag("mirror/app", "v1", &["sha256:a", "sha256:b"])
            .with_blob("sha256:a", 5)
            .with_blob("sha256:b", 6),
    );

    let report = auditor(&source).run().await.unwrap();

    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].label, "app:v1; mirror/app:v1");
    assert_eq!(report.groups[0].tags, 2);
    assert_eq!(report.total_size, 11);
    assert_eq!(source.total_blob_fetches(), 2);
}

#[tokio::test]
async fn test_embedded_sizes_need_no_blob_fetches() {
    let source = Arc::new(base_and_child().with_embedded_sizes());
    let report = auditor(&source).run().await.unwrap();

    assert_eq!(source.total_blob_fetches(), 0);
    assert_eq!(report.total_size, 150);
}

#[tokio::test]
async fn test_image_without_tags_is_empty() {
    let source = Arc::new(base_and_child().with_image("empty"));
    let report = auditor(&source).run().await.unwrap();

    assert!(report.image("empty").is_none());
    assert_eq!(report.total_size, 150);
}

#[tokio::test]
async fn test_unknown_repository_lists_no_tags() {
    let source = Arc::new(base_and_child());
    let tags = Pager::tags(source, "ghost", 10).collect_all().await.unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn test_missing_catalog_fails_the_scan() {
    let source = Arc::new(base_and_child().with_missing_catalog());
    let err = auditor(&source).run().await.unwrap_err();

    match err {
        AuditError::Listing { listing, source } => {
            assert_eq!(listing, "catalog");
            assert!(source.is_not_found());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(source.manifest_fetches(), 0);
}

#[tokio::test]
async fn test_failed_blob_fetch_aborts_scan() {
    let source = Arc::new(base_and_child().with_failing_blob("sha256:layerX"));
    let err = auditor(&source).run().await.unwrap_err();

    match err {
        AuditError::BlobInfo { digest, source, .. } => {
            assert_eq!(digest.as_str(), "sha256:layerX");
            assert!(source.is_not_found());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_manifest_is_retried_once() {
    let source = Arc::new(base_and_child().with_empty_manifest_once("app", "v2"));
    let report = auditor(&source).run().await.unwrap();

    assert_eq!(source.manifest_fetches(), 3);
    assert_eq!(report.groups.len(), 2);
}

#[tokio::test]
async fn test_transient_manifest_failures_are_retried() {
    let source = Arc::new(base_and_child().with_transient_manifest_failures(2));
    let report = auditor(&source).run().await.unwrap();

    assert_eq!(source.manifest_fetches(), 4);
    assert_eq!(report.total_size, 150);
}

#[tokio::test]
async fn test_max_images_limits_catalog_walk() {
    let source = Arc::new(
        StubSource::new()
            .with_tag("a", "latest", &["sha256:1"])
            .with_tag("b", "latest", &["sha256:2"])
            .with_tag("c", "latest", &["sha256:3"])
            .with_blob("sha256:1", 1)
            .with_blob("sha256:2", 2)
            .with_blob("sha256:3", 3),
    );
    let config = AuditConfig {
        max_images: Some(2),
        ..config()
    };

    let report = Auditor::new(source.clone(), config).run().await.unwrap();

    let names: Vec<_> = report.images.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(report.total_size, 3);
    assert_eq!(source.blob_fetches("sha256:3"), 0);
}

#[tokio::test]
async fn test_repeat_scan_is_idempotent() {
    let source = Arc::new(base_and_child());
    let first = auditor(&source).run().await.unwrap();
    let second = auditor(&source).run().await.unwrap();

    assert_eq!(first.rows, second.rows);
    assert_eq!(first.groups, second.groups);
}

#[tokio::test]
async fn test_durable_cache_skips_refetching() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("regstat.db");

    let first = Arc::new(base_and_child());
    let cache = Arc::new(MetadataCache::open(&path).unwrap());
    auditor(&first).with_cache(cache).run().await.unwrap();
    assert_eq!(first.total_blob_fetches(), 2);
    assert_eq!(first.manifest_fetches(), 2);

    let second = Arc::new(base_and_child());
    let cache = Arc::new(MetadataCache::open(&path).unwrap());
    let report = auditor(&second).with_cache(cache).run().await.unwrap();

    assert_eq!(second.total_blob_fetches(), 0);
    assert_eq!(second.manifest_fetches(), 0);
    assert_eq!(report.total_size, 150);
}
