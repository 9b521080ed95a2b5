//! Registry storage auditor.
//!
//! Scans a container registry and measures how much blob storage it holds,
//! counting each content-addressed blob once. Tags resolving to the same
//! ordered layer sequence form a blob group; a group whose layers extend a
//! registered group's layers is that group's child, and is attributed only
//! the bytes it adds.
//!
//! ```text
//!  catalog ──► tags ──► [image-tag pool] ──► manifest ──► group index
//!                                 │
//!                                 └──► [blob-info pool] ──► blob sizes (single-flight per digest)
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod index;
pub mod pool;
pub mod render;
pub mod report;
pub mod scan;
pub mod singleflight;

pub use cache::{CacheError, MetadataCache};
pub use config::AuditConfig;
pub use engine::{BlobFetch, DedupEngine};
pub use error::AuditError;
pub use group::{prefix_keys, BlobGroup, BlobGroupKey};
pub use index::{AuditIndex, BlobUsage, GroupAttribution, Registration};
pub use pool::WorkerPool;
pub use report::{AuditReport, GroupLabeler, GroupSummary, ImageSummary, ReportRow, ROOT};
pub use scan::Auditor;
pub use singleflight::{Flight, Joined, SingleFlight};
