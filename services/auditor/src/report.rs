//! Audit report aggregation.
//!
//! Rows form a tree rooted at the synthetic [`ROOT`] node: each image hangs
//! off the root, each of the image's groups hangs off the image, and each
//! group's ancestor chain nests below it. Node names carry a `_<n>` instance
//! suffix so that repeated labels still name distinct nodes.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::AuditError;
use crate::group::BlobGroupKey;
use crate::index::AuditIndex;

/// Name of the node carrying the registry-wide total.
pub const ROOT: &str = "root";

/// One `(name, parent, size)` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub name: String,
    pub parent: Option<String>,
    pub size: u64,
    /// Image whose subtree this row belongs to (`None` for the root).
    #[serde(skip)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSummary {
    pub name: String,
    pub tags: usize,
    pub groups: usize,
    /// Sum of the unique sizes of the image's groups.
    pub unique_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSummary {
    pub key: String,
    pub label: String,
    pub parent: Option<String>,
    pub layers: usize,
    pub tags: usize,
    pub unique_size: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub rows: Vec<ReportRow>,
    pub images: Vec<ImageSummary>,
    pub groups: Vec<GroupSummary>,
    pub blob_count: usize,
    pub total_size: u64,
}

/// Hands out `label_0`, `label_1`, ... per distinct label.
#[derive(Debug, Default)]
pub struct GroupLabeler {
    instances: HashMap<String, usize>,
}

impl GroupLabeler {
    pub fn next(&mut self, label: &str) -> String {
        let n = self.instances.entry(label.to_string()).or_default();
        let name = format!("{label}_{n}");
        *n += 1;
        name
    }
}

impl AuditReport {
    /// Aggregate a fully resolved index.
    pub fn build(index: &AuditIndex) -> Result<Self, AuditError> {
        let mut labeler = GroupLabeler::default();
        let mut rows = Vec::new();
        let mut images = Vec::new();

        for (image, groups) in index.images() {
            let mut image_unique = 0;

            // Label order keeps instance numbering stable across runs.
            let mut ordered = Vec::with_capacity(groups.len());
            for key in groups.keys() {
                ordered.push((label_of(index, key)?, *key));
            }
            ordered.sort();

            for (label, key) in ordered {
                let mut attribution = index.attribution(&key)?;
                image_unique += attribution.unique_size;

                let mut child = labeler.next(&label);
                rows.push(ReportRow {
                    name: child.clone(),
                    parent: Some(image.clone()),
                    size: attribution.unique_size,
                    image: Some(image.clone()),
                });

                while let Some(parent_key) = attribution.parent {
                    attribution = index.attribution(&parent_key)?;
                    let parent = labeler.next(&label_of(index, &parent_key)?);
                    rows.push(ReportRow {
                        name: parent.clone(),
                        parent: Some(child),
                        size: attribution.unique_size,
                        image: Some(image.clone()),
                    });
                    child = parent;
                }
            }

            rows.push(ReportRow {
                name: image.clone(),
                parent: Some(ROOT.to_string()),
                size: image_unique,
                image: Some(image.clone()),
            });
            images.push(ImageSummary {
                name: image.clone(),
                tags: groups.values().map(|tags| tags.len()).sum(),
                groups: groups.len(),
                unique_size: image_unique,
            });
        }

        let total_size = index.total_blob_size();
        rows.push(ReportRow {
            name: ROOT.to_string(),
            parent: None,
            size: total_size,
            image: None,
        });

        Ok(Self {
            rows,
            images,
            groups: group_summaries(index)?,
            blob_count: index.blob_count(),
            total_size,
        })
    }

    /// Rows of one image's subtree, with the image itself as the root.
    pub fn rows_for_image(&self, image: &str) -> Vec<ReportRow> {
        self.rows
            .iter()
            .filter(|row| row.image.as_deref() == Some(image))
            .map(|row| {
                let mut row = row.clone();
                if row.name == image {
                    row.parent = None;
                }
                row
            })
            .collect()
    }

    pub fn image(&self, name: &str) -> Option<&ImageSummary> {
        self.images.iter().find(|i| i.name == name)
    }
}

fn label_of(index: &AuditIndex, key: &BlobGroupKey) -> Result<String, AuditError> {
    index
        .group(key)
        .map(|group| group.label())
        .ok_or_else(|| AuditError::UnknownGroup(key.to_hex()))
}

fn group_summaries(index: &AuditIndex) -> Result<Vec<GroupSummary>, AuditError> {
    let mut summaries = BTreeMap::new();
    for group in index.groups() {
        let attribution = index.attribution(&group.key())?;
        let parent = attribution
            .parent
            .map(|key| label_of(index, &key))
            .transpose()?;

        summaries.insert(
            (group.label(), group.key()),
            GroupSummary {
                key: group.key().short(),
                label: group.label(),
                parent,
                layers: group.blobs().len(),
                tags: group.tag_count(),
                unique_size: attribution.unique_size,
                total_size: attribution.total_size,
            },
        );
    }
    Ok(summaries.into_values().collect())
}
