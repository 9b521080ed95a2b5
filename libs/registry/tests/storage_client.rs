//! Integration tests for the storage-layout client over a temporary tree.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use regstat_registry::{
    BlobDigest, MetadataSource, Pager, StorageConfig, StorageRegistryClient,
};

const V2: &str = "docker/registry/v2";

/// Write a blob into the layout and return its digest.
fn put_blob(root: &Path, data: &[u8]) -> String {
    let hex = hex::encode(Sha256::digest(data));
    let dir = root.join(V2).join("blobs/sha256").join(&hex[..2]).join(&hex);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("data"), data).unwrap();
    format!("sha256:{hex}")
}

fn tag_image(root: &Path, image: &str, tag: &str, manifest_digest: &str) {
    let dir = root
        .join(V2)
        .join("repositories")
        .join(image)
        .join("_manifests/tags")
        .join(tag)
        .join("current");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("link"), manifest_digest).unwrap();
    fs::create_dir_all(root.join(V2).join("repositories").join(image).join("_layers")).unwrap();
}

fn schema2_manifest(layers: &[(&str, u64)]) -> Vec<u8> {
    let layers: Vec<_> = layers
        .iter()
        .map(|(digest, size)| {
            serde_json::json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "digest": digest,
                "size": size,
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
        "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "digest": "sha256:cfg", "size": 1},
        "layers": layers,
    }))
    .unwrap()
}

fn client(root: &Path) -> Arc<StorageRegistryClient> {
    Arc::new(StorageRegistryClient::new(StorageConfig {
        root: root.to_path_buf(),
        bucket: Some("registry-bucket".to_string()),
    }))
}

#[tokio::test]
async fn test_catalog_lists_nested_repositories_in_pages() {
    let temp = TempDir::new().unwrap();
    let manifest = put_blob(temp.path(), &schema2_manifest(&[]));
    for image in ["zeta", "alpha", "team/app", "team/worker"] {
        tag_image(temp.path(), image, "latest", &manifest);
    }

    let mut pager = Pager::catalog(client(temp.path()), 2);
    let mut images = Vec::new();
    while let Some(image) = pager.next().await.unwrap() {
        images.push(image);
    }
    assert_eq!(images, vec!["alpha", "team/app", "team/worker", "zeta"]);
}

#[tokio::test]
async fn test_empty_storage_has_empty_catalog() {
    let temp = TempDir::new().unwrap();
    let images = Pager::catalog(client(temp.path()), 10)
        .collect_all()
        .await
        .unwrap();
    assert!(images.is_empty());
}

#[tokio::test]
async fn test_unknown_repository_has_no_tags() {
    let temp = TempDir::new().unwrap();
    let tags = Pager::tags(client(temp.path()), "nope", 10)
        .collect_all()
        .await
        .unwrap();
    assert!(tags.is_empty());
}

#[tokio::test]
async fn test_manifest_and_blob_info() {
    let temp = TempDir::new().unwrap();
    let base = put_blob(temp.path(), &[0u8; 100]);
    let top = put_blob(temp.path(), &[1u8; 50]);
    let manifest = put_blob(temp.path(), &schema2_manifest(&[(base.as_str(), 100), (top.as_str(), 50)]));
    tag_image(temp.path(), "app", "v2", &manifest);
    tag_image(temp.path(), "app", "v1", &manifest);

    let source = client(temp.path());

    let tags = Pager::tags(source.clone(), "app", 10)
        .collect_all()
        .await
        .unwrap();
    assert_eq!(tags, vec!["v1", "v2"]);

    let resolved = source.get_manifest("app", "v2").await.unwrap();
    assert_eq!(
        resolved.digests(),
        vec![BlobDigest::new(base.clone()), BlobDigest::new(top)]
    );

    let info = source
        .get_blob_info("app", &BlobDigest::new(base.clone()))
        .await
        .unwrap();
    assert_eq!(info.size, 100);
    assert!(info.modified_at.is_some());

    let location = info.location.unwrap();
    assert_eq!(location.bucket, "registry-bucket");
    assert!(location.key.ends_with("/data"));
    assert!(location.key.contains(base.trim_start_matches("sha256:")));
}

#[tokio::test]
async fn test_missing_tag_and_blob_are_not_found() {
    let temp = TempDir::new().unwrap();
    let manifest = put_blob(temp.path(), &schema2_manifest(&[]));
    tag_image(temp.path(), "app", "v1", &manifest);
    let source = client(temp.path());

    let err = source.get_manifest("app", "v9").await.unwrap_err();
    assert!(err.is_not_found());

    let err = source
        .get_blob_info("app", &BlobDigest::new("sha256:00ff"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
