use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::cursor::CursorSource;

/// How `pathPattern` globs match location files: `*` and `?` stay within one
/// path component, `**` spans directories.
pub const PATH_MATCH: glob::MatchOptions = glob::MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

// ── Locations ──────────────────────────────────────────────────────

/// Zero-based line/character position in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

/// Half-open `[start, end)` span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn contains(&self, pos: Position) -> bool {
        self.start <= pos && pos < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Repository-relative path.
    pub file: String,
    pub range: Range,
}

// ── Code smells ────────────────────────────────────────────────────

/// One detected instance of a code smell at one analyzed commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub id: String,
    pub lifespan_id: String,
    /// Position within the lifespan's chain, starting at 0.
    pub ordinal: u32,
    pub kind: String,
    pub message: Option<String>,
    pub locations: Vec<Location>,
    pub commit_id: String,
    pub repository: String,
    pub analysis_id: String,
}

impl Occurrence {
    pub fn position(&self) -> ChainPosition {
        ChainPosition::new(&self.lifespan_id, self.ordinal)
    }

    /// Whether `self` comes before `other` in the same chain.
    pub fn precedes(&self, other: &Occurrence) -> bool {
        self.lifespan_id == other.lifespan_id && self.ordinal < other.ordinal
    }

    pub fn touches_file(&self, file: &str) -> bool {
        self.locations.iter().any(|l| l.file == file)
    }

    pub fn touches_path_matching(&self, pattern: &glob::Pattern) -> bool {
        self.locations
            .iter()
            .any(|l| pattern.matches_with(&l.file, PATH_MATCH))
    }
}

impl CursorSource for Occurrence {
    fn cursor_value(&self, attribute: &str) -> Option<String> {
        match attribute {
            "id" => Some(self.id.clone()),
            "lifespanId" => Some(self.lifespan_id.clone()),
            "ordinal" => Some(self.ordinal.to_string()),
            _ => None,
        }
    }
}

/// Identity of a recurring code smell across history: the chain's spine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifespan {
    pub id: String,
    pub kind: String,
    pub repository: String,
    pub analysis_id: String,
}

impl CursorSource for Lifespan {
    fn cursor_value(&self, attribute: &str) -> Option<String> {
        match attribute {
            "id" => Some(self.id.clone()),
            _ => None,
        }
    }
}

/// A named grouping of occurrences produced by one tool run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    pub name: String,
}

/// Arena-style address of an occurrence: chain id plus index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainPosition {
    pub lifespan_id: String,
    pub ordinal: u32,
}

impl ChainPosition {
    pub fn new(lifespan_id: &str, ordinal: u32) -> Self {
        Self {
            lifespan_id: lifespan_id.to_string(),
            ordinal,
        }
    }
}

/// A lifespan's occurrences in chain order, as materialized by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainRows {
    /// Occurrences reachable from ordinal 0 by `ordinal + 1` steps.
    pub reachable: Vec<Occurrence>,
    /// Every occurrence the lifespan owns.
    pub total: usize,
}

// ── Commits ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// Strict ISO-8601 with the original offset.
    pub date: DateTime<FixedOffset>,
}

/// A commit as read from the repository. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub oid: String,
    pub message: String,
    pub author: Signature,
    pub committer: Signature,
    pub parents: Vec<String>,
}

impl Commit {
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// Filters accepted by the history log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilter {
    /// Revision to start walking from (default `HEAD`).
    pub revision: Option<String>,
    /// Regular expression matched against commit messages.
    pub message_pattern: Option<String>,
    pub after: Option<DateTime<FixedOffset>>,
    pub before: Option<DateTime<FixedOffset>>,
    /// Only commits touching this path.
    pub path: Option<String>,
}

// ── Query filters ──────────────────────────────────────────────────

/// Filters for occurrence pages. Any combination may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OccurrenceFilter {
    pub repository: Option<String>,
    pub analysis: Option<String>,
    pub commit: Option<String>,
    pub lifespan: Option<String>,
    pub kind: Option<String>,
    /// Occurrences with at least one location in this exact file.
    pub file: Option<String>,
    /// Occurrences with at least one location whose file matches this glob.
    pub path_pattern: Option<String>,
}

/// Filters for lifespan pages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LifespanFilter {
    pub repository: Option<String>,
    pub analysis: Option<String>,
    pub kind: Option<String>,
}

/// Pagination arguments of every connection field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageArgs {
    pub first: Option<u32>,
    pub after: Option<String>,
}

impl PageArgs {
    pub fn first(n: u32) -> Self {
        Self {
            first: Some(n),
            after: None,
        }
    }

    #[must_use]
    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }
}

// ── Ingest ─────────────────────────────────────────────────────────

/// One smell detected at the batch's commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCodeSmell {
    /// Client-chosen occurrence id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub lifespan_id: String,
    pub ordinal: u32,
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub locations: Vec<Location>,
}

/// Everything one analyzer run found at one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeSmellBatch {
    pub repository: String,
    pub commit_id: String,
    pub analysis_name: String,
    pub smells: Vec<NewCodeSmell>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertReport {
    pub analysis_id: String,
    pub occurrence_ids: Vec<String>,
    pub lifespans_created: u64,
}

/// Summary statistics about the store.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub analyses: u64,
    pub lifespans: u64,
    pub occurrences: u64,
    pub occurrences_by_kind: HashMap<String, u64>,
    pub repositories: Vec<String>,
    pub db_size_bytes: u64,
}
