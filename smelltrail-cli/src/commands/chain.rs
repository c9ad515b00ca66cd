use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use serde::Serialize;
use tokio::task::JoinSet;

use smelltrail_core::types::{Analysis, Commit, Lifespan, Occurrence};

use super::Workspace;

#[derive(Args, Debug)]
pub struct ChainArgs {
    /// Lifespan id
    pub lifespan: String,

    /// Resolve each occurrence's commit from the repository
    #[arg(long)]
    pub commits: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChainStep {
    #[serde(flatten)]
    occurrence: Occurrence,
    predecessor: Option<String>,
    successor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commit: Option<Commit>,
}

#[derive(Serialize)]
struct ChainView {
    lifespan: Lifespan,
    analysis: Analysis,
    occurrences: Vec<ChainStep>,
}

pub async fn run(args: ChainArgs, root: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(root)?;
    let graph = Arc::new(workspace.graph());

    let lifespan = graph
        .lifespan(&args.lifespan)
        .await
        .with_context(|| format!("Cannot load lifespan {}", args.lifespan))?;
    let analysis = graph.lifespan_analysis(&lifespan).await?;
    let chain = graph
        .lifespan_chain(&lifespan.id)
        .await
        .with_context(|| format!("Cannot walk lifespan {}", lifespan.id))?;

    // Every step is resolved as its own task so the commit lookups coalesce.
    let mut tasks = JoinSet::new();
    for (i, occurrence) in chain.iter().cloned().enumerate() {
        let graph = Arc::clone(&graph);
        let with_commit = args.commits;
        tasks.spawn(async move {
            let predecessor = graph.predecessor(&occurrence).await?.map(|o| o.id);
            let successor = graph.successor(&occurrence).await?.map(|o| o.id);
            let commit = if with_commit {
                Some(graph.occurrence_commit(&occurrence).await?)
            } else {
                None
            };
            Ok::<_, smelltrail_core::error::TrailError>((
                i,
                ChainStep {
                    occurrence,
                    predecessor,
                    successor,
                    commit,
                },
            ))
        });
    }

    let mut steps: Vec<Option<ChainStep>> = (0..chain.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (i, step) = joined
            .context("Chain task panicked")?
            .context("Cannot resolve chain step")?;
        steps[i] = Some(step);
    }

    super::print_json(&ChainView {
        lifespan,
        analysis,
        occurrences: steps.into_iter().flatten().collect(),
    })
}
