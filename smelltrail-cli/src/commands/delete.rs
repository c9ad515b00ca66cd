use std::path::Path;

use anyhow::Context;
use clap::{Args, Subcommand};

use smelltrail_core::error::{LoadError, NotFound, TrailError};

use super::Workspace;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(subcommand)]
    pub target: DeleteTarget,
}

#[derive(Subcommand, Debug)]
pub enum DeleteTarget {
    /// Delete one lifespan and its occurrences
    Lifespan { id: String },
    /// Delete an analysis (by name) with everything it recorded
    Analysis { name: String },
    /// Delete every lifespan recorded for a repository
    Repository { name: String },
}

fn missing(what: NotFound) -> anyhow::Error {
    TrailError::Load(LoadError::NotFound(what)).into()
}

pub async fn run(args: DeleteArgs, root: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(root)?;
    let graph = workspace.graph();

    match args.target {
        DeleteTarget::Lifespan { id } => {
            let removed = graph
                .delete_lifespan(&id)
                .await
                .with_context(|| format!("Cannot delete lifespan {id}"))?;
            if !removed {
                return Err(missing(NotFound::Lifespan(id)));
            }
            println!("Deleted lifespan {id}");
        }
        DeleteTarget::Analysis { name } => {
            let analysis = graph
                .analysis_by_name(&name)
                .await
                .with_context(|| format!("Cannot resolve analysis {name}"))?;
            graph
                .delete_analysis(&analysis.id)
                .await
                .with_context(|| format!("Cannot delete analysis {name}"))?;
            println!("Deleted analysis {name}");
        }
        DeleteTarget::Repository { name } => {
            let lifespans = graph
                .delete_repository(&name)
                .await
                .with_context(|| format!("Cannot delete repository data for {name}"))?;
            println!(
                "Deleted {lifespans} lifespan{} of repository {name}",
                if lifespans == 1 { "" } else { "s" }
            );
        }
    }
    Ok(())
}
