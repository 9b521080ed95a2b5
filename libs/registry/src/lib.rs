//! Container registry metadata sources.
//!
//! Everything the auditor needs to know about a registry comes through the
//! [`MetadataSource`] trait:
//!
//! - Catalog and tag listings, consumed lazily through a [`Pager`]
//! - Manifests, normalized to base-first layer order
//! - Blob size and modification time
//!
//! Two implementations ship here: [`HttpRegistryClient`] talks to the
//! registry HTTP API, [`StorageRegistryClient`] reads the registry's storage
//! layout directly (mounted bucket or filesystem driver root).

mod error;
mod http;
mod manifest;
mod pager;
mod retry;
mod source;
mod storage;
mod types;

pub use error::RegistryError;
pub use http::{next_link, HttpRegistryClient, HttpRegistryConfig};
pub use manifest::{Layer, Manifest, MANIFEST_ACCEPT};
pub use pager::{PageQuery, Pager, DEFAULT_PAGE_SIZE};
pub use retry::{BackoffPolicy, RetryPolicy};
pub use source::MetadataSource;
pub use storage::{StorageConfig, StorageRegistryClient};
pub use types::{BackendLocation, BlobDigest, BlobInfo, Page};
