use std::path::Path;

use anyhow::Context;
use clap::Args;

use super::Workspace;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Print the statistics as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: StatusArgs, root: &Path) -> anyhow::Result<()> {
    let workspace = Workspace::open(root)?;
    let stats = workspace
        .graph()
        .stats()
        .await
        .context("Failed to read store stats")?;

    if args.json {
        return super::print_json(&stats);
    }

    println!("smelltrail status for {}", workspace.root.display());
    println!();
    println!(
        "  Database: {}",
        workspace.config.db_path(&workspace.root).display()
    );
    if stats.db_size_bytes > 0 {
        println!("  Size:     {}", format_bytes(stats.db_size_bytes));
    }
    println!();

    println!("  Analyses:    {}", stats.analyses);
    println!("  Lifespans:   {}", stats.lifespans);
    println!("  Occurrences: {}", stats.occurrences);
    if !stats.occurrences_by_kind.is_empty() {
        let mut kinds: Vec<_> = stats.occurrences_by_kind.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (kind, count) in &kinds {
            println!("    {kind:<24} {count:>6}");
        }
    }
    println!();

    println!("  Repositories:");
    if workspace.config.repositories.is_empty() && stats.repositories.is_empty() {
        println!("    (none)");
    }
    for (name, path) in &workspace.config.repositories {
        let recorded = if stats.repositories.contains(name) {
            ""
        } else {
            " (no data)"
        };
        println!("    {name:<20} {}{recorded}", path.display());
    }
    for name in &stats.repositories {
        if !workspace.config.repositories.contains_key(name) {
            println!("    {name:<20} (not registered)");
        }
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1_048_576), "3.0 MB");
    }
}
