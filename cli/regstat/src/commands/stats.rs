//! Registry storage statistics.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;
use tracing::info;

use regstat_auditor::{render, AuditConfig, AuditReport, Auditor, MetadataCache};

use crate::error::CliError;
use crate::output::{
    display_bytes, display_option, format_bytes, print_heading, print_info, print_output,
    print_single, OutputFormat,
};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct StatsCommand {
    /// Stop after scanning this many repositories.
    #[arg(long)]
    max_images: Option<usize>,

    /// SQLite cache of blob info and manifests, reused across runs.
    #[arg(long, env = "REGSTAT_CACHE_PATH")]
    cache_path: Option<PathBuf>,

    /// Write a treemap of the whole registry to this HTML file.
    #[arg(long)]
    graph_path: Option<PathBuf>,

    /// Write one treemap HTML file per image into this directory.
    #[arg(long)]
    per_image_dir: Option<PathBuf>,

    /// Concurrent manifest resolutions.
    #[arg(long)]
    image_workers: Option<usize>,

    /// Concurrent blob info fetches.
    #[arg(long)]
    blob_workers: Option<usize>,

    /// Items per catalog/tag page.
    #[arg(long)]
    page_size: Option<usize>,
}

#[derive(Debug, Serialize, Tabled)]
struct ImageStatsRow {
    #[tabled(rename = "Image")]
    name: String,

    #[tabled(rename = "Tags")]
    tags: usize,

    #[tabled(rename = "Groups")]
    groups: usize,

    #[tabled(rename = "Unique Size", display = "display_bytes")]
    unique_size: u64,
}

#[derive(Debug, Serialize, Tabled)]
struct GroupStatsRow {
    #[tabled(rename = "Group")]
    key: String,

    #[tabled(rename = "Tags")]
    label: String,

    #[tabled(rename = "Parent", display = "display_option")]
    parent: Option<String>,

    #[tabled(rename = "Layers")]
    layers: usize,

    #[tabled(rename = "Unique Size", display = "display_bytes")]
    unique_size: u64,

    #[tabled(rename = "Total Size", display = "display_bytes")]
    total_size: u64,
}

impl StatsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let config = self.audit_config(&ctx);
        let mut auditor = Auditor::new(ctx.source()?, config);

        if let Some(path) = self.cache_path.as_ref().or(ctx.config.cache_path.as_ref()) {
            let cache = MetadataCache::open(path)
                .with_context(|| format!("Failed to open cache at {:?}", path))?;
            info!(path = %path.display(), "Using metadata cache");
            auditor = auditor.with_cache(Arc::new(cache));
        }

        let report = auditor.run().await.map_err(CliError::from)?;

        if let Some(path) = &self.graph_path {
            render::write_treemap(path, &report)
                .with_context(|| format!("Failed to write treemap to {:?}", path))?;
        }
        if let Some(dir) = &self.per_image_dir {
            render::write_per_image(dir, &report)
                .with_context(|| format!("Failed to write treemaps to {:?}", dir))?;
        }

        print_report(&report, ctx.format);
        Ok(())
    }

    /// Defaults, overridden by the config file, overridden by flags.
    fn audit_config(&self, ctx: &CommandContext) -> AuditConfig {
        let defaults = AuditConfig::default();
        let file = &ctx.config.stats;

        AuditConfig {
            page_size: self.page_size.or(file.page_size).unwrap_or(defaults.page_size),
            image_workers: self
                .image_workers
                .or(file.image_workers)
                .unwrap_or(defaults.image_workers),
            blob_workers: self
                .blob_workers
                .or(file.blob_workers)
                .unwrap_or(defaults.blob_workers),
            max_images: self.max_images.or(file.max_images),
            ..defaults
        }
    }
}

fn print_report(report: &AuditReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_single(report),
        OutputFormat::Table => {
            let images: Vec<_> = report
                .images
                .iter()
                .map(|i| ImageStatsRow {
                    name: i.name.clone(),
                    tags: i.tags,
                    groups: i.groups,
                    unique_size: i.unique_size,
                })
                .collect();
            print_heading("Images");
            print_output(&images, format);

            let groups: Vec<_> = report
                .groups
                .iter()
                .map(|g| GroupStatsRow {
                    key: g.key.clone(),
                    label: g.label.clone(),
                    parent: g.parent.clone(),
                    layers: g.layers,
                    unique_size: g.unique_size,
                    total_size: g.total_size,
                })
                .collect();
            print_heading("Blob groups");
            print_output(&groups, format);

            println!();
            print_info(&format!(
                "{} blobs, {} total ({} bytes)",
                report.blob_count,
                format_bytes(report.total_size),
                report.total_size
            ));
        }
    }
}
