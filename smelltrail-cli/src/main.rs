use std::path::PathBuf;

use clap::Parser;
use smelltrail_core::error::{LoadError, TrailError};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "smelltrail",
    version,
    about = "Track code-smell lifespans across git history"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Directory holding `.smelltrail/` (default: current directory)
    #[arg(long, global = true, env = "SMELLTRAIL_ROOT", default_value = ".")]
    root: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into an exit code.
///
///   0  success
///   1  general/unknown error
///   2  configuration error
///   3  not initialized / cannot resolve path
///   4  database error
///   5  entity not found
///   6  integrity violation
///   7  invalid input or cursor
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(trail) = err.chain().find_map(|e| e.downcast_ref::<TrailError>()) {
        return match trail {
            TrailError::Config(_) => 2,
            TrailError::Store(_) => 4,
            TrailError::Load(LoadError::NotFound(_)) => 5,
            TrailError::Integrity(_) | TrailError::Load(LoadError::Integrity(_)) => 6,
            TrailError::Cursor(_) | TrailError::InvalidInput(_) => 7,
            _ => 1,
        };
    }

    let lower = format!("{err:#}").to_lowercase();
    if lower.contains("not initialized") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("config") {
        2
    } else if lower.contains("database") || lower.contains("sqlite") {
        4
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, &cli.root)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use smelltrail_core::error::{ConfigError, CursorError, IntegrityViolation, NotFound};

    use super::*;

    #[test]
    fn exit_code_not_initialized() {
        let err = anyhow::anyhow!("smelltrail is not initialized in /foo. Run `smelltrail init` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_cannot_resolve() {
        let err = anyhow::anyhow!("Cannot resolve path: /nonexistent");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = anyhow::Error::new(TrailError::from(ConfigError::Parse("bad toml".into())))
            .context("Cannot load config");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_not_found() {
        let err = anyhow::Error::new(TrailError::Load(LoadError::NotFound(NotFound::Lifespan(
            "L1".into(),
        ))));
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_integrity() {
        let violation = IntegrityViolation::Truncated {
            lifespan: "L1".into(),
            reachable: 1,
            total: 2,
        };
        let err = anyhow::Error::new(TrailError::Load(LoadError::Integrity(violation)));
        assert_eq!(classify_exit_code(&err), 6);
    }

    #[test]
    fn exit_code_bad_cursor() {
        let err = anyhow::Error::new(TrailError::from(CursorError::Malformed))
            .context("Failed to list occurrences");
        assert_eq!(classify_exit_code(&err), 7);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
