pub mod chain;
pub mod delete;
pub mod import;
pub mod init;
pub mod lifespans;
pub mod occurrences;
pub mod status;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use serde::Serialize;

use smelltrail_core::config::SmelltrailConfig;
use smelltrail_core::graph::LifespanGraph;
use smelltrail_core::store::{RelationalStore, SqliteStore};
use smelltrail_core::vcs::GitRepositories;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default config and create the database
    Init(init::InitArgs),
    /// Import analyzer output (one batch or a JSON array of batches)
    Import(import::ImportArgs),
    /// List code-smell occurrences
    Occurrences(occurrences::OccurrencesArgs),
    /// List lifespans
    Lifespans(lifespans::LifespansArgs),
    /// Show the validated occurrence chain of one lifespan
    Chain(chain::ChainArgs),
    /// Delete a lifespan, an analysis, or a repository's data
    Delete(delete::DeleteArgs),
    /// Show store statistics
    Status(status::StatusArgs),
}

pub async fn run(cmd: Command, root: &Path) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args, root),
        Command::Import(args) => import::run(args, root).await,
        Command::Occurrences(args) => occurrences::run(args, root).await,
        Command::Lifespans(args) => lifespans::run(args, root).await,
        Command::Chain(args) => chain::run(args, root).await,
        Command::Delete(args) => delete::run(args, root).await,
        Command::Status(args) => status::run(args, root).await,
    }
}

/// An initialized smelltrail directory with its store open.
pub(crate) struct Workspace {
    pub root: PathBuf,
    pub config: SmelltrailConfig,
    pub store: Arc<SqliteStore>,
}

impl Workspace {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let root = std::fs::canonicalize(root)
            .with_context(|| format!("Cannot resolve path: {}", root.display()))?;

        if !SmelltrailConfig::path_for(&root).exists() {
            anyhow::bail!(
                "smelltrail is not initialized in {}. Run `smelltrail init` first.",
                root.display()
            );
        }
        let config = SmelltrailConfig::load(&root)
            .map_err(smelltrail_core::error::TrailError::from)
            .with_context(|| format!("Cannot load config in {}", root.display()))?;

        let db_path = config.db_path(&root);
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Cannot open database: {}", db_path.display()))?;

        Ok(Self {
            root,
            config,
            store: Arc::new(store),
        })
    }

    /// A fresh graph for one command; its caches die with it.
    pub fn graph(&self) -> LifespanGraph {
        LifespanGraph::new(
            Arc::clone(&self.store) as Arc<dyn RelationalStore>,
            Arc::new(GitRepositories::from_config(&self.config, &self.root)),
            &self.config,
        )
    }
}

pub(crate) fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{text}");
    Ok(())
}
