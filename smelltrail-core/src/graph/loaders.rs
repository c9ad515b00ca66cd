//! One [`BatchLoad`] per access pattern of the lifespan graph.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

use crate::batch::BatchLoad;
use crate::connection::normalize_window;
use crate::error::{IntegrityViolation, LoadError, NotFound};
use crate::store::{LifespanShape, OccurrenceShape, RelationalStore, WindowQuery};
use crate::types::{
    Analysis, ChainPosition, Commit, Lifespan, LifespanFilter, LogFilter, Occurrence,
    OccurrenceFilter,
};
use crate::vcs::CommitHistoryAdapter;

use super::chain::validate_chain;

type Loaded<V> = crate::error::Result<Vec<Result<V, LoadError>>>;

fn violation(v: IntegrityViolation) -> LoadError {
    error!(violation = %v, "integrity violation in batch result");
    LoadError::Integrity(v)
}

fn foreign(entity: &'static str, id: &str, field: &'static str, expected: &str, actual: &str) -> LoadError {
    violation(IntegrityViolation::ForeignRow {
        entity,
        id: id.to_string(),
        field,
        expected: expected.to_string(),
        actual: actual.to_string(),
    })
}

/// Group key indices by `group`, keeping first-seen order.
fn group_by<K, G: Eq + Hash + Clone>(keys: &[K], group: impl Fn(&K) -> G) -> Vec<(G, Vec<usize>)> {
    let mut order: Vec<(G, Vec<usize>)> = Vec::new();
    let mut slots: HashMap<G, usize> = HashMap::new();
    for (i, key) in keys.iter().enumerate() {
        let g = group(key);
        if let Some(&slot) = slots.get(&g) {
            order[slot].1.push(i);
        } else {
            slots.insert(g.clone(), order.len());
            order.push((g, vec![i]));
        }
    }
    order
}

/// Results placed by index; gaps become shape errors for their key.
fn settle<V>(
    loader: &'static str,
    slots: Vec<Option<Result<V, LoadError>>>,
    expected: usize,
    actual: usize,
) -> Vec<Result<V, LoadError>> {
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or(Err(LoadError::BatchShape {
                loader,
                expected,
                actual,
            }))
        })
        .collect()
}

// ── Occurrences ────────────────────────────────────────────────────

pub(crate) struct OccurrenceById {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for OccurrenceById {
    type Key = String;
    type Value = Occurrence;

    fn name(&self) -> &'static str {
        "occurrence_by_id"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    async fn load(&self, ids: &[String]) -> Loaded<Occurrence> {
        let rows = self.store.occurrences_by_id(ids).await?;
        Ok(ids
            .iter()
            .zip(rows)
            .map(|(id, row)| match row {
                None => Err(NotFound::Occurrence(id.clone()).into()),
                Some(o) if o.id != *id => Err(foreign("occurrence", &o.id, "id", id, &o.id)),
                Some(o) => Ok(o),
            })
            .collect())
    }
}

pub(crate) struct OccurrenceByPosition {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for OccurrenceByPosition {
    type Key = ChainPosition;
    type Value = Occurrence;

    fn name(&self) -> &'static str {
        "occurrence_by_chain_position"
    }

    fn cache_key(&self, key: &ChainPosition) -> String {
        format!("{}#{}", key.lifespan_id, key.ordinal)
    }

    async fn load(&self, positions: &[ChainPosition]) -> Loaded<Occurrence> {
        let rows = self.store.occurrences_by_position(positions).await?;
        Ok(positions
            .iter()
            .zip(rows)
            .map(|(pos, row)| match row {
                None => Err(NotFound::ChainPosition {
                    lifespan: pos.lifespan_id.clone(),
                    ordinal: pos.ordinal,
                }
                .into()),
                Some(o) if o.lifespan_id != pos.lifespan_id => Err(foreign(
                    "occurrence",
                    &o.id,
                    "lifespan",
                    &pos.lifespan_id,
                    &o.lifespan_id,
                )),
                Some(o) if o.ordinal != pos.ordinal => Err(foreign(
                    "occurrence",
                    &o.id,
                    "ordinal",
                    &pos.ordinal.to_string(),
                    &o.ordinal.to_string(),
                )),
                Some(o) => Ok(o),
            })
            .collect())
    }
}

/// Every returned row must satisfy the filter it was fetched for.
fn check_occurrence(filter: &OccurrenceFilter, o: &Occurrence) -> Result<(), LoadError> {
    let denormalized = [
        ("repository", filter.repository.as_deref(), o.repository.as_str()),
        ("analysis", filter.analysis.as_deref(), o.analysis_id.as_str()),
        ("commit", filter.commit.as_deref(), o.commit_id.as_str()),
        ("lifespan", filter.lifespan.as_deref(), o.lifespan_id.as_str()),
        ("kind", filter.kind.as_deref(), o.kind.as_str()),
    ];
    for (field, expected, actual) in denormalized {
        if let Some(expected) = expected {
            if expected != actual {
                return Err(foreign("occurrence", &o.id, field, expected, actual));
            }
        }
    }
    if let Some(file) = &filter.file {
        if !o.touches_file(file) {
            let files: Vec<&str> = o.locations.iter().map(|l| l.file.as_str()).collect();
            return Err(foreign("occurrence", &o.id, "file", file, &files.join(",")));
        }
    }
    if let Some(pattern) = &filter.path_pattern {
        let matched = glob::Pattern::new(pattern).is_ok_and(|p| o.touches_path_matching(&p));
        if !matched {
            let files: Vec<&str> = o.locations.iter().map(|l| l.file.as_str()).collect();
            return Err(foreign(
                "occurrence",
                &o.id,
                "pathPattern",
                pattern,
                &files.join(","),
            ));
        }
    }
    Ok(())
}

pub(crate) struct OccurrencePages {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for OccurrencePages {
    type Key = WindowQuery<OccurrenceFilter>;
    type Value = Arc<Vec<Occurrence>>;

    fn name(&self) -> &'static str {
        "occurrence_pages"
    }

    fn cache_key(&self, key: &Self::Key) -> String {
        format!("{key:?}")
    }

    async fn load(&self, keys: &[Self::Key]) -> Loaded<Self::Value> {
        let mut slots: Vec<Option<Result<Self::Value, LoadError>>> = vec![None; keys.len()];
        let mut answered = 0;
        for (shape, indices) in group_by(keys, |k| OccurrenceShape::of(&k.filter)) {
            let queries: Vec<_> = indices.iter().map(|&i| keys[i].clone()).collect();
            let windows = self.store.occurrence_windows(shape, &queries).await?;
            for (&i, window) in indices.iter().zip(windows) {
                let rows = normalize_window(window);
                let verdict = rows.iter().try_for_each(|o| check_occurrence(&keys[i].filter, o));
                slots[i] = Some(verdict.map(|()| Arc::new(rows)));
                answered += 1;
            }
        }
        Ok(settle(self.name(), slots, keys.len(), answered))
    }
}

// ── Lifespans ──────────────────────────────────────────────────────

pub(crate) struct LifespanById {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for LifespanById {
    type Key = String;
    type Value = Lifespan;

    fn name(&self) -> &'static str {
        "lifespan_by_id"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    async fn load(&self, ids: &[String]) -> Loaded<Lifespan> {
        let rows = self.store.lifespans_by_id(ids).await?;
        Ok(ids
            .iter()
            .zip(rows)
            .map(|(id, row)| match row {
                None => Err(NotFound::Lifespan(id.clone()).into()),
                Some(l) if l.id != *id => Err(foreign("lifespan", &l.id, "id", id, &l.id)),
                Some(l) => Ok(l),
            })
            .collect())
    }
}

fn check_lifespan(filter: &LifespanFilter, l: &Lifespan) -> Result<(), LoadError> {
    let fields = [
        ("repository", filter.repository.as_deref(), l.repository.as_str()),
        ("analysis", filter.analysis.as_deref(), l.analysis_id.as_str()),
        ("kind", filter.kind.as_deref(), l.kind.as_str()),
    ];
    for (field, expected, actual) in fields {
        if let Some(expected) = expected {
            if expected != actual {
                return Err(foreign("lifespan", &l.id, field, expected, actual));
            }
        }
    }
    Ok(())
}

pub(crate) struct LifespanPages {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for LifespanPages {
    type Key = WindowQuery<LifespanFilter>;
    type Value = Arc<Vec<Lifespan>>;

    fn name(&self) -> &'static str {
        "lifespan_pages"
    }

    fn cache_key(&self, key: &Self::Key) -> String {
        format!("{key:?}")
    }

    async fn load(&self, keys: &[Self::Key]) -> Loaded<Self::Value> {
        let mut slots: Vec<Option<Result<Self::Value, LoadError>>> = vec![None; keys.len()];
        let mut answered = 0;
        for (shape, indices) in group_by(keys, |k| LifespanShape::of(&k.filter)) {
            let queries: Vec<_> = indices.iter().map(|&i| keys[i].clone()).collect();
            let windows = self.store.lifespan_windows(shape, &queries).await?;
            for (&i, window) in indices.iter().zip(windows) {
                let rows = normalize_window(window);
                let verdict = rows.iter().try_for_each(|l| check_lifespan(&keys[i].filter, l));
                slots[i] = Some(verdict.map(|()| Arc::new(rows)));
                answered += 1;
            }
        }
        Ok(settle(self.name(), slots, keys.len(), answered))
    }
}

pub(crate) struct LifespanChains {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for LifespanChains {
    type Key = String;
    type Value = Arc<Vec<Occurrence>>;

    fn name(&self) -> &'static str {
        "lifespan_chain"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    async fn load(&self, ids: &[String]) -> Loaded<Self::Value> {
        let chains = self.store.lifespan_chains(ids).await?;
        Ok(ids
            .iter()
            .zip(chains)
            .map(|(id, chain)| match chain {
                None => Err(NotFound::Lifespan(id.clone()).into()),
                Some(rows) => validate_chain(id, rows).map(Arc::new).map_err(violation),
            })
            .collect())
    }
}

// ── Analyses ───────────────────────────────────────────────────────

pub(crate) struct AnalysisById {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for AnalysisById {
    type Key = String;
    type Value = Analysis;

    fn name(&self) -> &'static str {
        "analysis_by_id"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    async fn load(&self, ids: &[String]) -> Loaded<Analysis> {
        let rows = self.store.analyses_by_id(ids).await?;
        Ok(ids
            .iter()
            .zip(rows)
            .map(|(id, row)| row.ok_or_else(|| NotFound::Analysis(id.clone()).into()))
            .collect())
    }
}

pub(crate) struct AnalysisByName {
    pub store: Arc<dyn RelationalStore>,
}

#[async_trait::async_trait]
impl BatchLoad for AnalysisByName {
    type Key = String;
    type Value = Analysis;

    fn name(&self) -> &'static str {
        "analysis_by_name"
    }

    fn cache_key(&self, key: &String) -> String {
        key.clone()
    }

    async fn load(&self, names: &[String]) -> Loaded<Analysis> {
        let rows = self.store.analyses_by_name(names).await?;
        Ok(names
            .iter()
            .zip(rows)
            .map(|(name, row)| row.ok_or_else(|| NotFound::Analysis(name.clone()).into()))
            .collect())
    }
}

// ── Commit history ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CommitKey {
    pub repository: String,
    pub revision: String,
}

/// Commits by revision; one `get_commits` call per repository in the batch.
pub(crate) struct CommitLoader {
    pub vcs: Arc<dyn CommitHistoryAdapter>,
}

#[async_trait::async_trait]
impl BatchLoad for CommitLoader {
    type Key = CommitKey;
    type Value = Commit;

    fn name(&self) -> &'static str {
        "commit"
    }

    fn cache_key(&self, key: &CommitKey) -> String {
        format!("{}@{}", key.repository, key.revision)
    }

    fn abort_on_cancel(&self) -> bool {
        true
    }

    async fn load(&self, keys: &[CommitKey]) -> Loaded<Commit> {
        let mut slots: Vec<Option<Result<Commit, LoadError>>> = vec![None; keys.len()];
        for (repository, indices) in group_by(keys, |k| k.repository.clone()) {
            let revisions: Vec<String> = indices.iter().map(|&i| keys[i].revision.clone()).collect();
            match self.vcs.get_commits(&repository, &revisions).await {
                Ok(found) => {
                    for &i in &indices {
                        let key = &keys[i];
                        slots[i] = Some(found.get(&key.revision).cloned().ok_or_else(|| {
                            NotFound::Commit {
                                repository: key.repository.clone(),
                                revision: key.revision.clone(),
                            }
                            .into()
                        }));
                    }
                }
                // One bad repository must not fail the others in the batch.
                Err(e) => {
                    let err = LoadError::from_batch(self.name(), e);
                    for &i in &indices {
                        slots[i] = Some(Err(err.clone()));
                    }
                }
            }
        }
        Ok(settle(self.name(), slots, keys.len(), keys.len()))
    }
}

/// Run one call per key, at most `limit` at a time.
///
/// Dropping the future aborts every spawned call.
async fn fan_out<K, V, F, Fut>(
    loader: &'static str,
    keys: &[K],
    limit: usize,
    call: F,
) -> Vec<Result<V, LoadError>>
where
    K: Clone,
    V: Clone + Send + 'static,
    F: Fn(K) -> Fut,
    Fut: Future<Output = crate::error::Result<V>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    for (i, key) in keys.iter().cloned().enumerate() {
        let permits = Arc::clone(&permits);
        let fut = call(key);
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            (i, fut.await)
        });
    }

    let mut slots: Vec<Option<Result<V, LoadError>>> = vec![None; keys.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((i, result)) => slots[i] = Some(result.map_err(|e| LoadError::from_batch(loader, e))),
            Err(e) => error!(loader, error = %e, "history task failed"),
        }
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(LoadError::Dispatch {
                    loader,
                    message: "history task did not complete".to_string(),
                })
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FileListKey {
    pub repository: String,
    pub commit: String,
    pub dir: Option<String>,
}

pub(crate) struct FileLists {
    pub vcs: Arc<dyn CommitHistoryAdapter>,
    pub max_processes: usize,
}

#[async_trait::async_trait]
impl BatchLoad for FileLists {
    type Key = FileListKey;
    type Value = Arc<Vec<String>>;

    fn name(&self) -> &'static str {
        "files"
    }

    fn cache_key(&self, key: &FileListKey) -> String {
        format!("{key:?}")
    }

    fn abort_on_cancel(&self) -> bool {
        true
    }

    async fn load(&self, keys: &[FileListKey]) -> Loaded<Self::Value> {
        Ok(fan_out(self.name(), keys, self.max_processes, |key| {
            let vcs = Arc::clone(&self.vcs);
            async move {
                let files = vcs
                    .list_files(&key.repository, &key.commit, key.dir.as_deref())
                    .await?;
                Ok(Arc::new(files))
            }
        })
        .await)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FileKey {
    pub repository: String,
    pub commit: String,
    pub path: String,
}

pub(crate) struct FileContents {
    pub vcs: Arc<dyn CommitHistoryAdapter>,
    pub max_processes: usize,
}

#[async_trait::async_trait]
impl BatchLoad for FileContents {
    type Key = FileKey;
    type Value = Arc<Vec<u8>>;

    fn name(&self) -> &'static str {
        "file_content"
    }

    fn cache_key(&self, key: &FileKey) -> String {
        format!("{key:?}")
    }

    fn abort_on_cancel(&self) -> bool {
        true
    }

    async fn load(&self, keys: &[FileKey]) -> Loaded<Self::Value> {
        Ok(fan_out(self.name(), keys, self.max_processes, |key| {
            let vcs = Arc::clone(&self.vcs);
            async move {
                let bytes = vcs
                    .file_content(&key.repository, &key.commit, &key.path)
                    .await?;
                Ok(Arc::new(bytes))
            }
        })
        .await)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct LogKey {
    pub repository: String,
    pub filter: LogFilter,
    pub skip: u32,
    pub max_count: Option<u32>,
}

pub(crate) struct Logs {
    pub vcs: Arc<dyn CommitHistoryAdapter>,
    pub max_processes: usize,
}

#[async_trait::async_trait]
impl BatchLoad for Logs {
    type Key = LogKey;
    type Value = Arc<Vec<Commit>>;

    fn name(&self) -> &'static str {
        "log"
    }

    fn cache_key(&self, key: &LogKey) -> String {
        format!("{key:?}")
    }

    fn abort_on_cancel(&self) -> bool {
        true
    }

    async fn load(&self, keys: &[LogKey]) -> Loaded<Self::Value> {
        Ok(fan_out(self.name(), keys, self.max_processes, |key| {
            let vcs = Arc::clone(&self.vcs);
            async move {
                let commits = vcs
                    .log(&key.repository, &key.filter, key.skip, key.max_count)
                    .await?;
                Ok(Arc::new(commits))
            }
        })
        .await)
    }
}
