//! In-memory indices built up during a scan.
//!
//! The index only ever grows: groups are created once and gain tags, blob
//! info transitions once from unknown to known. Final attribution is a pure
//! function of its contents, independent of the order results arrived in.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use regstat_registry::{BlobDigest, BlobInfo};

use crate::error::AuditError;
use crate::group::{prefix_keys, BlobGroup, BlobGroupKey};

/// Per-blob record: its info once known, and which image tags reference it.
#[derive(Debug, Clone, Default)]
pub struct BlobUsage {
    info: Option<BlobInfo>,
    usage: BTreeMap<String, BTreeSet<String>>,
}

impl BlobUsage {
    pub fn info(&self) -> Option<&BlobInfo> {
        self.info.as_ref()
    }

    /// image -> tags referencing this blob.
    pub fn usage(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.usage
    }
}

/// Outcome of registering one resolved `image:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub key: BlobGroupKey,
    /// The group did not exist before this registration.
    pub created: bool,
    /// Distinct digests of the group whose info is not yet known.
    pub missing: Vec<BlobDigest>,
}

/// Unique size of a group relative to its nearest registered ancestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupAttribution {
    /// Bytes of the layers after the parent's prefix (all layers if parentless).
    pub unique_size: u64,
    /// Bytes of every layer in the group.
    pub total_size: u64,
    pub parent: Option<BlobGroupKey>,
}

#[derive(Debug, Default)]
pub struct AuditIndex {
    groups: HashMap<BlobGroupKey, BlobGroup>,
    /// image -> group -> tags.
    images: BTreeMap<String, BTreeMap<BlobGroupKey, BTreeSet<String>>>,
    blobs: HashMap<BlobDigest, BlobUsage>,
}

impl AuditIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `image:tag` resolved to the base-first `blobs`.
    ///
    /// Re-registering the same tag with the same layers is a no-op apart from
    /// recomputing `missing`.
    pub fn register(&mut self, image: &str, tag: &str, blobs: Vec<BlobDigest>) -> Registration {
        let key = BlobGroupKey::of(&blobs);
        let created = !self.groups.contains_key(&key);

        let group = self
            .groups
            .entry(key)
            .or_insert_with(|| BlobGroup::new(blobs));
        group.add_tag(image, tag);

        self.images
            .entry(image.to_string())
            .or_default()
            .entry(key)
            .or_default()
            .insert(tag.to_string());

        let mut seen = HashSet::new();
        let mut missing = Vec::new();
        for digest in group.blobs() {
            let usage = self.blobs.entry(digest.clone()).or_default();
            usage
                .usage
                .entry(image.to_string())
                .or_default()
                .insert(tag.to_string());

            if usage.info.is_none() && seen.insert(digest) {
                missing.push(digest.clone());
            }
        }

        Registration {
            key,
            created,
            missing,
        }
    }

    /// Store info for `digest`. The first writer wins; returns whether this
    /// call populated it.
    pub fn record_blob_info(&mut self, digest: &BlobDigest, info: BlobInfo) -> bool {
        let usage = self.blobs.entry(digest.clone()).or_default();
        if usage.info.is_some() {
            return false;
        }
        usage.info = Some(info);
        true
    }

    pub fn has_blob_info(&self, digest: &BlobDigest) -> bool {
        self.blob_info(digest).is_some()
    }

    pub fn blob_info(&self, digest: &BlobDigest) -> Option<&BlobInfo> {
        self.blobs.get(digest).and_then(BlobUsage::info)
    }

    pub fn blob(&self, digest: &BlobDigest) -> Option<&BlobUsage> {
        self.blobs.get(digest)
    }

    pub fn group(&self, key: &BlobGroupKey) -> Option<&BlobGroup> {
        self.groups.get(key)
    }

    pub fn groups(&self) -> impl Iterator<Item = &BlobGroup> {
        self.groups.values()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// image -> group -> tags, ordered by image name.
    pub fn images(&self) -> &BTreeMap<String, BTreeMap<BlobGroupKey, BTreeSet<String>>> {
        &self.images
    }

    /// Distinct blobs referenced by any group.
    pub fn blob_count(&self) -> usize {
        self.blobs.values().filter(|b| !b.usage.is_empty()).count()
    }

    /// Sum of sizes over distinct referenced blobs with known info.
    pub fn total_blob_size(&self) -> u64 {
        self.blobs
            .values()
            .filter(|b| !b.usage.is_empty())
            .filter_map(|b| b.info.as_ref())
            .map(|info| info.size)
            .sum()
    }

    /// Digests referenced by a group that still have no info.
    pub fn unresolved_blobs(&self) -> Vec<BlobDigest> {
        let mut digests: Vec<_> = self
            .blobs
            .iter()
            .filter(|(_, b)| b.info.is_none() && !b.usage.is_empty())
            .map(|(d, _)| d.clone())
            .collect();
        digests.sort();
        digests
    }

    /// Find the nearest registered ancestor of a group and the bytes it adds.
    ///
    /// Prefix lengths are scanned from longest to shortest; the first prefix
    /// whose key is a different registered group is the parent. Every blob
    /// must have known info by the time this runs.
    pub fn attribution(&self, key: &BlobGroupKey) -> Result<GroupAttribution, AuditError> {
        let group = self
            .groups
            .get(key)
            .ok_or_else(|| AuditError::UnknownGroup(key.to_hex()))?;
        let blobs = group.blobs();

        let mut sizes = Vec::with_capacity(blobs.len());
        for digest in blobs {
            let info = self
                .blob_info(digest)
                .ok_or_else(|| AuditError::MissingBlobInfo {
                    digest: digest.clone(),
                })?;
            sizes.push(info.size);
        }
        let total_size = sizes.iter().sum();

        let prefixes = prefix_keys(blobs);
        let parent = (0..blobs.len())
            .rev()
            .find(|&len| prefixes[len] != *key && self.groups.contains_key(&prefixes[len]));

        Ok(match parent {
            Some(len) => GroupAttribution {
                unique_size: sizes[len..].iter().sum(),
                total_size,
                parent: Some(prefixes[len]),
            },
            None => GroupAttribution {
                unique_size: total_size,
                total_size,
                parent: None,
            },
        })
    }
}
