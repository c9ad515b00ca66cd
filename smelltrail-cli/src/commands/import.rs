use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use smelltrail_core::import::{import, parse_batches};
use smelltrail_core::progress::BarProgress;

use super::Workspace;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// JSON file with one batch or an array of batches
    pub file: PathBuf,

    /// Insert batches in file order instead of history order
    #[arg(long)]
    pub no_reorder: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ImportArgs, root: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(root)?;
    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Cannot read import file: {}", args.file.display()))?;
    let batches = parse_batches(&text)
        .with_context(|| format!("Cannot parse import file: {}", args.file.display()))?;

    let graph = workspace.graph();
    let progress = BarProgress::new();
    let order_by_history = !args.no_reorder && workspace.config.ingest.validate_ancestry;
    let summary = import(&graph, batches, order_by_history, &progress)
        .await
        .with_context(|| format!("Import of {} failed", args.file.display()))?;

    if args.json {
        super::print_json(&summary)?;
    } else {
        println!(
            "Imported {} batch{}: {} occurrences, {} new lifespans",
            summary.batches,
            if summary.batches == 1 { "" } else { "es" },
            summary.occurrences,
            summary.lifespans_created
        );
    }
    Ok(())
}
