use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use smelltrail_core::config::SmelltrailConfig;
use smelltrail_core::store::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Register a repository as NAME=PATH (repeatable)
    #[arg(long = "repo", value_name = "NAME=PATH", value_parser = parse_repo)]
    pub repos: Vec<(String, PathBuf)>,

    /// Custom database location
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Overwrite an existing config
    #[arg(long)]
    pub force: bool,
}

fn parse_repo(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
            Ok((name.trim().to_string(), PathBuf::from(path.trim())))
        }
        _ => Err(format!("expected NAME=PATH, got {raw:?}")),
    }
}

pub fn run(args: InitArgs, root: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Cannot create directory: {}", root.display()))?;
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Cannot resolve path: {}", root.display()))?;

    let config_path = SmelltrailConfig::path_for(&root);
    if config_path.exists() && !args.force {
        anyhow::bail!(
            "smelltrail is already set up in {} (use --force to overwrite)",
            root.display()
        );
    }

    let mut config = SmelltrailConfig::default();
    if let Some(db_path) = args.db_path {
        config.store.path = db_path;
    }
    config.repositories.extend(args.repos);
    // A directory that is itself a working copy registers under its own name.
    if config.repositories.is_empty() && root.join(".git").exists() {
        if let Some(name) = root.file_name().and_then(|n| n.to_str()) {
            config.repositories.insert(name.to_string(), PathBuf::from("."));
        }
    }
    config
        .validate()
        .map_err(smelltrail_core::error::TrailError::from)
        .context("Invalid config")?;

    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create directory: {}", dir.display()))?;
    }
    let text = config
        .to_toml()
        .map_err(smelltrail_core::error::TrailError::from)
        .context("Cannot render config")?;
    std::fs::write(&config_path, text)
        .with_context(|| format!("Cannot write config: {}", config_path.display()))?;

    let db_path = config.db_path(&root);
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Cannot create directory: {}", dir.display()))?;
    }
    SqliteStore::open(&db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;

    println!("Initialized smelltrail in {}", root.display());
    println!("  Config:   {}", config_path.display());
    println!("  Database: {}", db_path.display());
    for (name, path) in &config.repositories {
        println!("  Repository {name}: {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_flag_parses_name_and_path() {
        assert_eq!(
            parse_repo("demo=/srv/demo").unwrap(),
            ("demo".to_string(), PathBuf::from("/srv/demo"))
        );
        assert!(parse_repo("demo").is_err());
        assert!(parse_repo("=/srv/demo").is_err());
    }
}
