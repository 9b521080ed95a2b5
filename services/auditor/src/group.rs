//! Blob groups: one per distinct ordered layer sequence.
//!
//! Two tags whose manifests list the same layers in the same order share a
//! group, whatever their image names. Group keys are order sensitive so that
//! parent detection can compare layer *prefixes*.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use regstat_registry::BlobDigest;
use sha2::{Digest, Sha256};

/// SHA-256 over the ordered digest sequence.
///
/// Each digest is length-prefixed, so distinct sequences never share an
/// encoding (`["a.b"]` and `["a", "b"]` hash differently).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobGroupKey([u8; 32]);

impl BlobGroupKey {
    /// Key of an ordered (base-first) digest sequence.
    pub fn of(blobs: &[BlobDigest]) -> Self {
        let mut hasher = Sha256::new();
        for digest in blobs {
            absorb(&mut hasher, digest);
        }
        Self(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Debug for BlobGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobGroupKey({})", self.short())
    }
}

impl fmt::Display for BlobGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn absorb(hasher: &mut Sha256, digest: &BlobDigest) {
    let bytes = digest.as_str().as_bytes();
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Keys of every prefix of `blobs`: element `L` is the key of `blobs[..L]`.
///
/// Computed in one pass by snapshotting the running hash state, which keeps
/// parent inference linear in group length.
pub fn prefix_keys(blobs: &[BlobDigest]) -> Vec<BlobGroupKey> {
    let mut hasher = Sha256::new();
    let mut keys = Vec::with_capacity(blobs.len() + 1);
    keys.push(BlobGroupKey(hasher.clone().finalize().into()));
    for digest in blobs {
        absorb(&mut hasher, digest);
        keys.push(BlobGroupKey(hasher.clone().finalize().into()));
    }
    keys
}

/// A distinct image build and every image:tag that points at it.
#[derive(Debug, Clone)]
pub struct BlobGroup {
    key: BlobGroupKey,
    blobs: Vec<BlobDigest>,
    images: BTreeMap<String, BTreeSet<String>>,
}

impl BlobGroup {
    /// Create a group for a base-first digest sequence. The sequence is
    /// fixed for the group's lifetime.
    pub fn new(blobs: Vec<BlobDigest>) -> Self {
        Self {
            key: BlobGroupKey::of(&blobs),
            blobs,
            images: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> BlobGroupKey {
        self.key
    }

    /// Layers, base first.
    pub fn blobs(&self) -> &[BlobDigest] {
        &self.blobs
    }

    /// image -> tags pointing at this group.
    pub fn images(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.images
    }

    /// Record `image:tag`; returns false if it was already recorded.
    pub(crate) fn add_tag(&mut self, image: &str, tag: &str) -> bool {
        self.images
            .entry(image.to_string())
            .or_default()
            .insert(tag.to_string())
    }

    pub fn tag_count(&self) -> usize {
        self.images.values().map(BTreeSet::len).sum()
    }

    /// Human-readable description: `app:v1,v2; base:latest`.
    pub fn label(&self) -> String {
        if self.images.is_empty() {
            return format!("group {}", self.key.short());
        }
        self.images
            .iter()
            .map(|(image, tags)| {
                let tags: Vec<&str> = tags.iter().map(String::as_str).collect();
                format!("{image}:{}", tags.join(","))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn digests(items: &[&str]) -> Vec<BlobDigest> {
        items.iter().map(|s| BlobDigest::new(*s)).collect()
    }

    #[test]
    fn test_key_is_order_sensitive() {
        let ab = BlobGroupKey::of(&digests(&["a", "b"]));
        let ba = BlobGroupKey::of(&digests(&["b", "a"]));
        assert_ne!(ab, ba);
        assert_eq!(ab, BlobGroupKey::of(&digests(&["a", "b"])));
    }

    #[test]
    fn test_key_encoding_is_unambiguous() {
        assert_ne!(
            BlobGroupKey::of(&digests(&["a.b"])),
            BlobGroupKey::of(&digests(&["a", "b"]))
        );
        assert_ne!(
            BlobGroupKey::of(&digests(&[""])),
            BlobGroupKey::of(&[])
        );
    }

    #[test]
    fn test_prefix_keys_match_direct_keys() {
        let blobs = digests(&["sha256:a", "sha256:b", "sha256:c"]);
        let keys = prefix_keys(&blobs);
        assert_eq!(keys.len(), 4);
        for (len, key) in keys.iter().enumerate() {
            assert_eq!(*key, BlobGroupKey::of(&blobs[..len]));
        }
    }

    #[test]
    fn test_group_label() {
        let mut group = BlobGroup::new(digests(&["sha256:a"]));
        assert!(group.label().starts_with("group "));

        assert!(group.add_tag("web", "v2"));
        assert!(group.add_tag("web", "v1"));
        assert!(!group.add_tag("web", "v1"));
        assert!(group.add_tag("api", "latest"));

        assert_eq!(group.label(), "api:latest; web:v1,v2");
        assert_eq!(group.tag_count(), 3);
    }

    proptest! {
        #[test]
        fn prop_keys_equal_iff_sequences_equal(
            a in proptest::collection::vec("[a-f0-9.:]{0,6}", 0..6),
            b in proptest::collection::vec("[a-f0-9.:]{0,6}", 0..6),
        ) {
            let da: Vec<BlobDigest> = a.iter().map(|s| BlobDigest::new(s.as_str())).collect();
            let db: Vec<BlobDigest> = b.iter().map(|s| BlobDigest::new(s.as_str())).collect();
            prop_assert_eq!(BlobGroupKey::of(&da) == BlobGroupKey::of(&db), a == b);
        }

        #[test]
        fn prop_permutations_have_distinct_keys(
            blobs in proptest::collection::vec("sha256:[0-9a-f]{8}", 2..6),
        ) {
            let mut reversed = blobs.clone();
            reversed.reverse();
            prop_assume!(reversed != blobs);

            let forward: Vec<BlobDigest> = blobs.iter().map(|s| BlobDigest::new(s.as_str())).collect();
            let backward: Vec<BlobDigest> = reversed.iter().map(|s| BlobDigest::new(s.as_str())).collect();
            prop_assert_ne!(BlobGroupKey::of(&forward), BlobGroupKey::of(&backward));
        }

        #[test]
        fn prop_prefix_keys_are_keys_of_prefixes(
            blobs in proptest::collection::vec("sha256:[0-9a-f]{4}", 0..8),
        ) {
            let blobs: Vec<BlobDigest> = blobs.into_iter().map(|s| BlobDigest::new(s)).collect();
            let keys = prefix_keys(&blobs);
            for len in 0..=blobs.len() {
                prop_assert_eq!(keys[len], BlobGroupKey::of(&blobs[..len]));
            }
        }
    }
}
