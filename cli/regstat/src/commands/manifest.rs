//! Manifest inspection.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use regstat_registry::BlobInfo;

use crate::error::CliError;
use crate::output::{display_option, display_size, print_output};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ManifestCommand {
    /// Repository name.
    #[arg(long)]
    image: String,

    /// Tag name.
    #[arg(long)]
    tag: String,

    /// Fetch size and modification time of every layer.
    #[arg(long)]
    blob_info: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct LayerRow {
    #[tabled(rename = "#")]
    index: usize,

    #[tabled(rename = "Digest")]
    digest: String,

    #[tabled(rename = "Size", display = "display_size")]
    size: Option<u64>,

    #[tabled(rename = "Modified", display = "display_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    modified_at: Option<String>,

    #[tabled(rename = "Location", display = "display_option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl ManifestCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let source = ctx.source()?;
        let manifest = source
            .get_manifest(&self.image, &self.tag)
            .await
            .map_err(CliError::from)?;

        let mut rows = Vec::with_capacity(manifest.layers.len());
        for (index, layer) in manifest.layers.iter().enumerate() {
            let info: Option<BlobInfo> = if self.blob_info {
                Some(
                    source
                        .get_blob_info(&self.image, &layer.digest)
                        .await
                        .map_err(CliError::from)?,
                )
            } else {
                None
            };

            rows.push(LayerRow {
                index,
                digest: layer.digest.to_string(),
                size: info.as_ref().map(|i| i.size).or(layer.size),
                modified_at: info
                    .as_ref()
                    .and_then(|i| i.modified_at)
                    .map(|t| t.to_rfc3339()),
                location: info
                    .as_ref()
                    .and_then(|i| i.location.as_ref())
                    .map(|l| format!("{}/{}", l.bucket, l.key)),
            });
        }

        print_output(&rows, ctx.format);
        Ok(())
    }
}
