//! Metadata source reading a registry's storage layout directly.
//!
//! The registry's storage driver keeps repositories and blobs under a fixed
//! tree. Reading that tree from a mounted bucket (or a filesystem-driver root)
//! avoids the HTTP API entirely and sees the same data:
//!
//! ```text
//! <root>/docker/registry/v2/
//! ├── blobs/sha256/<xx>/<hex>/data
//! └── repositories/<name>/_manifests/tags/<tag>/current/link
//! ```

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::debug;

use crate::error::RegistryError;
use crate::manifest::Manifest;
use crate::source::MetadataSource;
use crate::types::{BackendLocation, BlobDigest, BlobInfo, Page};

const REGISTRY_PREFIX: &str = "docker/registry/v2";

/// Configuration for the storage-layout client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory containing `docker/registry/v2`.
    pub root: PathBuf,
    /// Bucket name recorded in blob locations (defaults to the root path).
    pub bucket: Option<String>,
}

/// Storage-layout metadata source.
pub struct StorageRegistryClient {
    config: StorageConfig,
}

impl StorageRegistryClient {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    fn registry_root(&self) -> PathBuf {
        self.config.root.join(REGISTRY_PREFIX)
    }

    fn repositories_root(&self) -> PathBuf {
        self.registry_root().join("repositories")
    }

    fn repository_path(&self, image: &str) -> PathBuf {
        self.repositories_root().join(image)
    }

    /// Storage key of a blob's data, relative to the root.
    fn blob_key(digest: &BlobDigest) -> String {
        let (algorithm, hex) = digest.split();
        let shard = hex.get(..2).unwrap_or(hex);
        format!("{REGISTRY_PREFIX}/blobs/{algorithm}/{shard}/{hex}/data")
    }

    fn blob_path(&self, digest: &BlobDigest) -> PathBuf {
        self.config.root.join(Self::blob_key(digest))
    }

    /// Every repository name, sorted.
    ///
    /// A repository is any directory holding a `_manifests` directory; names
    /// may be nested (`team/app`).
    async fn list_repositories(&self) -> Result<Vec<String>, RegistryError> {
        let root = self.repositories_root();
        let mut names = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_dir() {
                    continue;
                }
                let name = entry.file_name();
                if name == "_manifests" {
                    if let Ok(relative) = dir.strip_prefix(&root) {
                        names.push(path_to_name(relative));
                    }
                } else if !name.to_string_lossy().starts_with('_') {
                    pending.push(entry.path());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    async fn list_tags(&self, image: &str) -> Result<Vec<String>, RegistryError> {
        let tags_dir = self.repository_path(image).join("_manifests/tags");
        let mut entries = match fs::read_dir(&tags_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(image.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut tags = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().join("current/link").exists() {
                tags.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        tags.sort();
        Ok(tags)
    }

    async fn read_link(&self, image: &str, tag: &str) -> Result<BlobDigest, RegistryError> {
        let link = self
            .repository_path(image)
            .join("_manifests/tags")
            .join(tag)
            .join("current/link");
        match fs::read_to_string(&link).await {
            Ok(digest) => Ok(BlobDigest::new(digest.trim())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(RegistryError::NotFound(format!("{image}:{tag}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn path_to_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Slice a sorted listing after `cursor` (exclusive), `page_size` items at a time.
fn page_after(items: Vec<String>, page_size: usize, cursor: Option<&str>) -> Page {
    let start = match cursor {
        Some(last) => items.partition_point(|item| item.as_str() <= last),
        None => 0,
    };
    let end = (start + page_size).min(items.len());
    let page: Vec<String> = items[start..end].to_vec();
    let next = if end < items.len() {
        page.last().cloned()
    } else {
        None
    };
    Page::new(page, next)
}

#[async_trait]
impl MetadataSource for StorageRegistryClient {
    async fn catalog_page(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError> {
        let names = self.list_repositories().await?;
        Ok(page_after(names, page_size.max(1), cursor))
    }

    async fn tags_page(
        &self,
        image: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError> {
        let tags = self.list_tags(image).await?;
        Ok(page_after(tags, page_size.max(1), cursor))
    }

    async fn get_manifest(&self, image: &str, tag: &str) -> Result<Manifest, RegistryError> {
        let digest = self.read_link(image, tag).await?;
        let path = self.blob_path(&digest);
        debug!(image, tag, digest = %digest, path = %path.display(), "Reading manifest");

        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(format!("{image}:{tag}")))
            }
            Err(e) => return Err(e.into()),
        };
        Manifest::parse(&format!("{image}:{tag}"), &body)
    }

    async fn get_blob_info(
        &self,
        _image: &str,
        digest: &BlobDigest,
    ) -> Result<BlobInfo, RegistryError> {
        let path = self.blob_path(digest);
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RegistryError::NotFound(digest.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let bucket = self
            .config
            .bucket
            .clone()
            .unwrap_or_else(|| self.config.root.display().to_string());

        Ok(BlobInfo {
            size: metadata.len(),
            modified_at: metadata.modified().ok().map(DateTime::<Utc>::from),
            location: Some(BackendLocation {
                region: None,
                bucket,
                key: Self::blob_key(digest),
            }),
        })
    }
}
