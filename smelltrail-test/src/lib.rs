// Integration test utilities and fixture management for smelltrail.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use smelltrail_core::config::SmelltrailConfig;
use smelltrail_core::graph::LifespanGraph;
use smelltrail_core::store::{RelationalStore, SqliteStore};
use smelltrail_core::types::{CodeSmellBatch, Location, NewCodeSmell, Position, Range};
use smelltrail_core::vcs::GitRepositories;

/// Name every fixture repository is registered under.
pub const REPO: &str = "demo";

/// A temporary git repository with a known history.
#[derive(Debug)]
pub struct TestRepo {
    pub dir: tempfile::TempDir,
    /// Commits on `main`, oldest first.
    pub main: Vec<String>,
    /// Commits on `side`, which forks from `main[0]`.
    pub side: Vec<String>,
}

impl TestRepo {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Four commits on `main` growing a god class, plus a one-commit `side`
    /// branch forked from the first.
    pub fn god_class() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let root = dir.path();

        git(root, &["init", "--initial-branch=main"]);
        git(root, &["config", "user.email", "test@smelltrail.dev"]);
        git(root, &["config", "user.name", "Test"]);

        let mut main = Vec::new();
        std::fs::create_dir_all(root.join("src/service")).unwrap();
        std::fs::write(root.join("src/service/Orders.java"), "class Orders {}\n").unwrap();
        main.push(commit(root, "Add orders service"));

        std::fs::write(
            root.join("src/service/Orders.java"),
            "class Orders {\n  void ship() {}\n  void bill() {}\n}\n",
        )
        .unwrap();
        main.push(commit(root, "Orders ships and bills"));

        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("docs/orders.md"), "# Orders\n").unwrap();
        main.push(commit(root, "Document orders"));

        std::fs::write(
            root.join("src/service/Orders.java"),
            "class Orders {\n  void ship() {}\n  void bill() {}\n  void audit() {}\n}\n",
        )
        .unwrap();
        main.push(commit(root, "Orders audits too\n\nIt keeps growing."));

        git(root, &["checkout", "-b", "side", &main[0]]);
        std::fs::write(root.join("src/service/Refunds.java"), "class Refunds {}\n").unwrap();
        let side = vec![commit(root, "Add refunds on a side branch")];
        git(root, &["checkout", "main"]);

        Self { dir, main, side }
    }

    pub fn repositories(&self) -> GitRepositories {
        let mut map = BTreeMap::new();
        map.insert(REPO.to_string(), self.path().to_path_buf());
        GitRepositories::new(map)
    }

    /// A graph over `store` and this repository.
    pub fn graph(&self, store: &Arc<SqliteStore>) -> LifespanGraph {
        LifespanGraph::new(
            Arc::clone(store) as Arc<dyn RelationalStore>,
            Arc::new(self.repositories()),
            &test_config(),
        )
    }
}

/// Default config with a short collection window.
pub fn test_config() -> SmelltrailConfig {
    let mut config = SmelltrailConfig::default();
    config.batch.delay_ms = 1;
    config
}

pub fn memory_store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().expect("open in-memory store"))
}

/// Run git in `dir` and return trimmed stdout; panics on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@smelltrail.dev")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@smelltrail.dev")
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

fn commit(root: &Path, message: &str) -> String {
    git(root, &["add", "."]);
    git(root, &["commit", "-q", "-m", message]);
    git(root, &["rev-parse", "HEAD"])
}

/// A `GodClass` detection covering the top of `file`.
pub fn smell(lifespan: &str, ordinal: u32, file: &str) -> NewCodeSmell {
    NewCodeSmell {
        id: Some(format!("{lifespan}-{ordinal}")),
        lifespan_id: lifespan.to_string(),
        ordinal,
        kind: "GodClass".to_string(),
        message: Some(format!("{file} has too many responsibilities")),
        locations: vec![Location {
            file: file.to_string(),
            range: Range {
                start: Position {
                    line: 0,
                    character: 0,
                },
                end: Position {
                    line: 4,
                    character: 1,
                },
            },
        }],
    }
}

pub fn batch(commit: &str, smells: Vec<NewCodeSmell>) -> CodeSmellBatch {
    CodeSmellBatch {
        repository: REPO.to_string(),
        commit_id: commit.to_string(),
        analysis_name: "pmd".to_string(),
        smells,
    }
}

/// The batches as an import file.
pub fn import_json(batches: &[CodeSmellBatch]) -> String {
    serde_json::to_string_pretty(batches).expect("serialize batches")
}
