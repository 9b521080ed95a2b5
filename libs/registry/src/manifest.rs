//! Image manifest parsing.
//!
//! Only layer digests (and sizes, when embedded) are extracted. Layers are
//! normalized to base-first order: schema 1 lists `fsLayers` leaf-first, so
//! they are reversed; schema 2 and OCI manifests are already base-first.

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::{BlobDigest, BlobInfo};

/// Accept header sent when fetching manifests.
pub const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.v1+prettyjws;q=0.5, \
application/vnd.docker.distribution.manifest.v1+json;q=0.5";

/// One layer reference within a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub digest: BlobDigest,
    /// Size embedded in the manifest (schema 2 / OCI only).
    #[serde(default)]
    pub size: Option<u64>,
}

/// Layers of one image build, base layer first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub layers: Vec<Layer>,
}

/// Raw wire document, covering the schema variants we understand.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    schema_version: Option<u32>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    fs_layers: Option<Vec<RawFsLayer>>,
    #[serde(default)]
    layers: Option<Vec<RawDescriptor>>,
    #[serde(default)]
    manifests: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFsLayer {
    blob_sum: String,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    digest: String,
    #[serde(default)]
    size: Option<u64>,
}

impl Manifest {
    /// Build from base-first digests with no embedded sizes.
    pub fn from_digests<I, D>(digests: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<BlobDigest>,
    {
        Self {
            layers: digests
                .into_iter()
                .map(|d| Layer {
                    digest: d.into(),
                    size: None,
                })
                .collect(),
        }
    }

    /// Parse a registry manifest body.
    ///
    /// `reference` (`image:tag`) is only used for error context.
    pub fn parse(reference: &str, body: &[u8]) -> Result<Self, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidManifest {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(invalid("empty body"));
        }

        let raw: RawManifest =
            serde_json::from_slice(body).map_err(|e| invalid(&format!("malformed JSON: {e}")))?;

        if raw.manifests.is_some() {
            return Err(invalid("manifest lists are not supported"));
        }

        match (raw.schema_version, raw.fs_layers, raw.layers) {
            (Some(1), Some(fs_layers), _) => Ok(Self::from_digests(
                fs_layers.into_iter().rev().map(|l| l.blob_sum),
            )),
            (Some(2), _, Some(layers)) => Ok(Self {
                layers: layers
                    .into_iter()
                    .map(|l| Layer {
                        digest: BlobDigest::new(l.digest),
                        size: l.size,
                    })
                    .collect(),
            }),
            (version, _, _) => Err(invalid(&format!(
                "unsupported schema version {version:?} (media type {:?})",
                raw.media_type
            ))),
        }
    }

    /// Ordered digests, base first.
    pub fn digests(&self) -> Vec<BlobDigest> {
        self.layers.iter().map(|l| l.digest.clone()).collect()
    }

    /// Blob info for layers whose size is embedded in the manifest.
    pub fn embedded_infos(&self) -> impl Iterator<Item = (&BlobDigest, BlobInfo)> {
        self.layers
            .iter()
            .filter_map(|l| l.size.map(|size| (&l.digest, BlobInfo::from_manifest_size(size))))
    }
}
