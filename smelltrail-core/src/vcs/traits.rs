use std::collections::HashMap;

use crate::types::{Commit, LogFilter};

/// Read access to the version-control history of registered repositories.
///
/// Repositories are addressed by their configured name. An unregistered name
/// fails with `VcsError::UnknownRepository`; a revision that does not resolve
/// fails with `VcsError::UnknownRevision`.
#[async_trait::async_trait]
pub trait CommitHistoryAdapter: Send + Sync {
    /// Resolve commits in one pass over the object database.
    ///
    /// The map is keyed by the requested revision string. Revisions that do
    /// not resolve are absent from the map rather than failing the call.
    async fn get_commits(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<HashMap<String, Commit>>;

    /// Paths of all files at `commit`, optionally restricted to `dir`.
    async fn list_files(
        &self,
        repository: &str,
        commit: &str,
        dir: Option<&str>,
    ) -> crate::error::Result<Vec<String>>;

    async fn file_content(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> crate::error::Result<Vec<u8>>;

    /// History walk, newest first.
    async fn log(
        &self,
        repository: &str,
        filter: &LogFilter,
        skip: u32,
        max_count: Option<u32>,
    ) -> crate::error::Result<Vec<Commit>>;

    /// `revisions` reordered parents-before-children.
    async fn topological_order(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<Vec<String>>;

    /// Whether `ancestor` is `descendant` or one of its ancestors.
    async fn is_ancestor(
        &self,
        repository: &str,
        ancestor: &str,
        descendant: &str,
    ) -> crate::error::Result<bool>;
}
