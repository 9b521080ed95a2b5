//! Catalog listing.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use regstat_registry::Pager;

use crate::error::CliError;
use crate::output::print_output;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ImagesCommand {
    /// Stop after this many repositories.
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize, Tabled)]
struct ImageRow {
    #[tabled(rename = "Image")]
    name: String,
}

impl ImagesCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let mut pager = Pager::catalog(ctx.source()?, ctx.page_size());

        let mut rows = Vec::new();
        while let Some(name) = pager.next().await.map_err(CliError::from)? {
            rows.push(ImageRow { name });
            if self.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }

        print_output(&rows, ctx.format);
        Ok(())
    }
}
