//! Tag listing.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use regstat_registry::Pager;

use crate::error::CliError;
use crate::output::print_output;

use super::CommandContext;

#[derive(Debug, Args)]
pub struct TagsCommand {
    /// Repository name.
    #[arg(long)]
    image: String,
}

#[derive(Debug, Serialize, Tabled)]
struct TagRow {
    #[tabled(rename = "Tag")]
    tag: String,
}

impl TagsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        // Unknown repositories list as empty.
        let tags = Pager::tags(ctx.source()?, self.image, ctx.page_size())
            .collect_all()
            .await
            .map_err(CliError::from)?;

        let rows: Vec<_> = tags.into_iter().map(|tag| TagRow { tag }).collect();
        print_output(&rows, ctx.format);
        Ok(())
    }
}
