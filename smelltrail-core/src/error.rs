/// Top-level smelltrail error type.
///
/// All fallible operations in `smelltrail-core` return [`Result<T, TrailError>`](Result).
/// Each variant wraps a layer-specific error enum so callers can match on the
/// source without losing type information.
#[derive(thiserror::Error, Debug)]
pub enum TrailError {
    /// Error from the relational store (`SQLite` operations, migrations).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Error from the commit-history adapter (git objects, subprocesses).
    #[error("Version control error: {0}")]
    Vcs(#[from] VcsError),

    /// A coalesced lookup failed, either for its own key or for its whole batch.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// A pagination cursor could not be decoded for the requested field.
    #[error("Invalid cursor: {0}")]
    Cursor(#[from] CursorError),

    /// Error in configuration parsing or validation.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Stored data violates a lifespan invariant. Never recovered locally.
    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    /// Caller-supplied arguments are malformed (bad glob, empty id, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TrailError {
    /// The per-key not-found error carried by this error, if any.
    pub fn not_found(&self) -> Option<&NotFound> {
        match self {
            Self::Load(LoadError::NotFound(nf)) => Some(nf),
            _ => None,
        }
    }
}

/// Errors from the SQLite-backed relational store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying `SQLite` operation failed.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema creation or upgrade failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// JSON (de)serialization of locations or batch inputs failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the commit-history adapter.
#[derive(thiserror::Error, Debug)]
pub enum VcsError {
    /// No repository is registered under this name.
    #[error("unknown repository: {0}")]
    UnknownRepository(String),

    /// The revision does not resolve to a commit in the repository.
    #[error("unknown revision {revision} in {repository}")]
    UnknownRevision {
        /// Repository name.
        repository: String,
        /// Revision as given by the caller.
        revision: String,
    },

    /// The path does not exist at the given revision.
    #[error("no path {path} at {revision} in {repository}")]
    UnknownPath {
        /// Repository name.
        repository: String,
        /// Revision the path was looked up at.
        revision: String,
        /// Repository-relative path.
        path: String,
    },

    /// A `git` subprocess exited unsuccessfully.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// Subcommand that was run (`log`, `ls-tree`, ...).
        command: String,
        /// Captured standard error.
        stderr: String,
    },

    /// Object database access through `gix` failed.
    #[error("Git error: {0}")]
    Git(String),

    /// Spawning or talking to a subprocess failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entity-specific "absent" errors, reported per key.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    #[error("unknown code smell occurrence: {0}")]
    Occurrence(String),

    #[error("no occurrence at ordinal {ordinal} of lifespan {lifespan}")]
    ChainPosition { lifespan: String, ordinal: u32 },

    #[error("unknown lifespan: {0}")]
    Lifespan(String),

    #[error("unknown analysis: {0}")]
    Analysis(String),

    #[error("unknown repository: {0}")]
    Repository(String),

    #[error("unknown revision {revision} in {repository}")]
    Commit { repository: String, revision: String },

    #[error("no file {path} at {revision} in {repository}")]
    File {
        repository: String,
        revision: String,
        path: String,
    },
}

/// Violations of the lifespan data-model invariants.
///
/// These indicate a bug in the store or in a query and are surfaced as
/// internal errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// A batch returned a row that does not satisfy the filter it was fetched for.
    #[error("{entity} {id}: requested {field} = {expected}, store returned {actual}")]
    ForeignRow {
        entity: &'static str,
        id: String,
        field: &'static str,
        expected: String,
        actual: String,
    },

    /// A materialized chain skipped or repeated an ordinal.
    #[error("lifespan {lifespan}: expected ordinal {expected}, found {found}")]
    OrdinalGap {
        lifespan: String,
        expected: u32,
        found: u32,
    },

    /// A chain step belongs to a different lifespan than the chain.
    #[error("lifespan {lifespan}: ordinal {ordinal} belongs to lifespan {actual}")]
    ChainMismatch {
        lifespan: String,
        ordinal: u32,
        actual: String,
    },

    /// Fewer occurrences were reachable from ordinal 0 than the lifespan owns.
    #[error("lifespan {lifespan}: chain reaches {reachable} of {total} occurrences")]
    Truncated {
        lifespan: String,
        reachable: usize,
        total: usize,
    },

    /// An occurrence disagrees with the lifespan it claims to extend.
    #[error("lifespan {lifespan} has {field} {existing}, occurrence claims {claimed}")]
    LifespanConflict {
        lifespan: String,
        field: &'static str,
        existing: String,
        claimed: String,
    },

    /// A new occurrence would leave a hole in (or overwrite part of) its chain.
    #[error("lifespan {lifespan} holds {count} occurrences, cannot append ordinal {ordinal}")]
    NonContiguousAppend {
        lifespan: String,
        count: u32,
        ordinal: u32,
    },

    /// The predecessor's commit is not an ancestor of the successor's commit.
    #[error(
        "lifespan {lifespan}: commit {predecessor} of ordinal {ordinal} is not an ancestor of {commit}"
    )]
    Ancestry {
        lifespan: String,
        ordinal: u32,
        predecessor: String,
        commit: String,
    },
}

/// Result of one key in a coalesced batch.
///
/// Cloneable so a single outcome can be handed to every waiter of a key.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The key has no backing entity.
    #[error(transparent)]
    NotFound(#[from] NotFound),

    /// The batch result for this key broke a data-model invariant.
    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    /// The bulk call itself failed; every key in the batch sees this.
    #[error("batch dispatch failed in {loader}: {message}")]
    Dispatch {
        loader: &'static str,
        message: String,
    },

    /// The bulk function broke the one-result-per-key contract.
    #[error("{loader} returned {actual} results for {expected} keys")]
    BatchShape {
        loader: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The batch was aborted before it produced a result.
    #[error("batch in {0} was cancelled")]
    Cancelled(&'static str),
}

impl LoadError {
    /// Classify a failed bulk call.
    ///
    /// Typed absence and integrity failures keep their meaning; everything
    /// else becomes a retryable dispatch error.
    pub fn from_batch(loader: &'static str, err: TrailError) -> Self {
        match err {
            TrailError::Load(inner) => inner,
            TrailError::Integrity(violation) => Self::Integrity(violation),
            TrailError::Vcs(VcsError::UnknownRepository(name)) => {
                Self::NotFound(NotFound::Repository(name))
            }
            TrailError::Vcs(VcsError::UnknownRevision {
                repository,
                revision,
            }) => Self::NotFound(NotFound::Commit {
                repository,
                revision,
            }),
            TrailError::Vcs(VcsError::UnknownPath {
                repository,
                revision,
                path,
            }) => Self::NotFound(NotFound::File {
                repository,
                revision,
                path,
            }),
            other => Self::Dispatch {
                loader,
                message: other.to_string(),
            },
        }
    }
}

/// Errors decoding a pagination cursor.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CursorError {
    /// The token is not valid base64 or not a cursor payload.
    #[error("cursor is not a valid token")]
    Malformed,

    /// The embedded sort key is not one the field accepts.
    #[error("sort key [{0}] is not accepted here")]
    UnexpectedKey(String),

    /// The payload lacks a value for one of the key's attributes.
    #[error("missing value for `{0}`")]
    MissingValue(String),
}

/// Errors in smelltrail configuration parsing and validation.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist at the expected path.
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// Configuration values are present but semantically invalid.
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// Configuration file syntax could not be parsed (TOML error).
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convenience alias for `Result<T, TrailError>`.
pub type Result<T> = std::result::Result<T, TrailError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_errors_keep_not_found_meaning() {
        let err = TrailError::Vcs(VcsError::UnknownRevision {
            repository: "demo".into(),
            revision: "deadbeef".into(),
        });
        assert_eq!(
            LoadError::from_batch("commits", err),
            LoadError::NotFound(NotFound::Commit {
                repository: "demo".into(),
                revision: "deadbeef".into(),
            })
        );
    }

    #[test]
    fn store_failures_become_dispatch_errors() {
        let err = TrailError::Store(StoreError::Migration("boom".into()));
        let load = LoadError::from_batch("occurrence_by_id", err);
        assert!(matches!(
            load,
            LoadError::Dispatch {
                loader: "occurrence_by_id",
                ..
            }
        ));
    }

    #[test]
    fn not_found_accessor() {
        let err = TrailError::Load(LoadError::NotFound(NotFound::Lifespan("L1".into())));
        assert_eq!(err.not_found(), Some(&NotFound::Lifespan("L1".into())));
        let err = TrailError::InvalidInput("x".into());
        assert!(err.not_found().is_none());
    }
}
