//! The metadata source contract shared by every registry backend.

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::manifest::Manifest;
use crate::types::{BlobDigest, BlobInfo, Page};

/// Read-only view of a registry's catalog, tags, manifests and blobs.
///
/// Implementations are interchangeable: the HTTP registry API client and the
/// storage-layout client return identical results for the same registry.
/// Paging is cursor based; cursors are opaque to callers and only ever come
/// from a previous page's `next`.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// One page of repository names.
    async fn catalog_page(
        &self,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError>;

    /// One page of tag names for `image`.
    ///
    /// Unknown repositories report a not-found error (see
    /// [`RegistryError::is_not_found`]).
    async fn tags_page(
        &self,
        image: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<Page, RegistryError>;

    /// Manifest for `image:tag`, layers base first.
    async fn get_manifest(&self, image: &str, tag: &str) -> Result<Manifest, RegistryError>;

    /// Size and modification time of a blob.
    async fn get_blob_info(
        &self,
        image: &str,
        digest: &BlobDigest,
    ) -> Result<BlobInfo, RegistryError>;
}
