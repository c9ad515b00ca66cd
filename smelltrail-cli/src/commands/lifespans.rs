use std::path::Path;

use anyhow::Context;
use clap::Args;

use smelltrail_core::types::LifespanFilter;

use super::Workspace;
use super::occurrences::{PageFlags, analysis_id};

#[derive(Args, Debug)]
pub struct LifespansArgs {
    #[arg(long)]
    pub repository: Option<String>,

    /// Analysis name
    #[arg(long)]
    pub analysis: Option<String>,

    #[arg(long)]
    pub kind: Option<String>,

    #[command(flatten)]
    pub page: PageFlags,
}

pub async fn run(args: LifespansArgs, root: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(root)?;
    let graph = workspace.graph();

    let filter = LifespanFilter {
        repository: args.repository,
        analysis: analysis_id(&graph, args.analysis).await?,
        kind: args.kind,
    };
    let connection = graph
        .lifespans(filter, &args.page.into())
        .await
        .context("Failed to list lifespans")?;
    super::print_json(&connection)
}
