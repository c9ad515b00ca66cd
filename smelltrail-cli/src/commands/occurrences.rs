use std::path::Path;

use anyhow::Context;
use clap::Args;

use smelltrail_core::graph::LifespanGraph;
use smelltrail_core::types::{OccurrenceFilter, PageArgs};

use super::Workspace;

/// Pagination flags shared by every list command.
#[derive(Args, Debug, Clone)]
pub struct PageFlags {
    /// Maximum number of results
    #[arg(long)]
    pub first: Option<u32>,

    /// Cursor of the last result of the previous page
    #[arg(long)]
    pub after: Option<String>,
}

impl From<PageFlags> for PageArgs {
    fn from(flags: PageFlags) -> Self {
        Self {
            first: flags.first,
            after: flags.after,
        }
    }
}

#[derive(Args, Debug)]
pub struct OccurrencesArgs {
    #[arg(long)]
    pub repository: Option<String>,

    /// Analysis name
    #[arg(long)]
    pub analysis: Option<String>,

    #[arg(long)]
    pub commit: Option<String>,

    #[arg(long)]
    pub lifespan: Option<String>,

    #[arg(long)]
    pub kind: Option<String>,

    /// Exact file path of a location
    #[arg(long)]
    pub file: Option<String>,

    /// Glob over location file paths, e.g. `src/**/*.java`
    #[arg(long)]
    pub path_pattern: Option<String>,

    #[command(flatten)]
    pub page: PageFlags,
}

/// Turn an analysis name into the id the store filters by.
pub(crate) async fn analysis_id(
    graph: &LifespanGraph,
    name: Option<String>,
) -> anyhow::Result<Option<String>> {
    match name {
        Some(name) => {
            let analysis = graph
                .analysis_by_name(&name)
                .await
                .with_context(|| format!("Cannot resolve analysis {name}"))?;
            Ok(Some(analysis.id))
        }
        None => Ok(None),
    }
}

pub async fn run(args: OccurrencesArgs, root: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(root)?;
    let graph = workspace.graph();

    let filter = OccurrenceFilter {
        repository: args.repository,
        analysis: analysis_id(&graph, args.analysis).await?,
        commit: args.commit,
        lifespan: args.lifespan,
        kind: args.kind,
        file: args.file,
        path_pattern: args.path_pattern,
    };
    let connection = graph
        .occurrences(filter, &args.page.into())
        .await
        .context("Failed to list occurrences")?;
    super::print_json(&connection)
}
