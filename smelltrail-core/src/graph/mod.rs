//! The lifespan graph: every read and write of one logical operation.
//!
//! A [`LifespanGraph`] owns one coalescer per access pattern, so all lookups
//! issued while serving one request are deduplicated and batched together.
//! Build a fresh graph per request; caches are never shared across requests.

mod chain;
mod ingest;
mod loaders;

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::batch::{BatchScope, RequestCoalescer};
use crate::config::{IngestSection, SmelltrailConfig};
use crate::connection::{Connection, ConnectionBuilder, window_size};
use crate::cursor::{self, DecodedCursor, SortKey};
use crate::error::{CursorError, IntegrityViolation, LoadError, TrailError};
use crate::store::{LifespanShape, OccurrenceShape, RelationalStore, WindowQuery};
use crate::types::{
    Analysis, ChainPosition, CodeSmellBatch, Commit, InsertReport, Lifespan, LifespanFilter,
    LogFilter, Occurrence, OccurrenceFilter, PageArgs, StoreStats,
};
use crate::vcs::CommitHistoryAdapter;

use loaders::{
    AnalysisById, AnalysisByName, CommitKey, CommitLoader, FileContents, FileKey, FileListKey,
    FileLists, LifespanById, LifespanChains, LifespanPages, LogKey, Logs, OccurrenceById,
    OccurrenceByPosition, OccurrencePages,
};

pub struct LifespanGraph {
    store: Arc<dyn RelationalStore>,
    vcs: Arc<dyn CommitHistoryAdapter>,
    ingest: IngestSection,
    scope: BatchScope,

    occurrence_by_id: RequestCoalescer<OccurrenceById>,
    occurrence_by_position: RequestCoalescer<OccurrenceByPosition>,
    occurrence_pages: RequestCoalescer<OccurrencePages>,
    lifespan_by_id: RequestCoalescer<LifespanById>,
    lifespan_pages: RequestCoalescer<LifespanPages>,
    lifespan_chains: RequestCoalescer<LifespanChains>,
    analysis_by_id: RequestCoalescer<AnalysisById>,
    analysis_by_name: RequestCoalescer<AnalysisByName>,

    commits: RequestCoalescer<CommitLoader>,
    file_lists: RequestCoalescer<FileLists>,
    file_contents: RequestCoalescer<FileContents>,
    logs: RequestCoalescer<Logs>,
}

impl fmt::Debug for LifespanGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifespanGraph")
            .field("scope", &self.scope)
            .field("validate_ancestry", &self.ingest.validate_ancestry)
            .finish_non_exhaustive()
    }
}

impl LifespanGraph {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        vcs: Arc<dyn CommitHistoryAdapter>,
        config: &SmelltrailConfig,
    ) -> Self {
        let scope = BatchScope::new(&config.batch);
        let max_processes = config.batch.max_concurrent_processes;
        let stored = || Arc::clone(&store);
        let history = || Arc::clone(&vcs);

        Self {
            occurrence_by_id: RequestCoalescer::new(
                OccurrenceById { store: stored() },
                scope.clone(),
            ),
            occurrence_by_position: RequestCoalescer::new(
                OccurrenceByPosition { store: stored() },
                scope.clone(),
            ),
            occurrence_pages: RequestCoalescer::new(
                OccurrencePages { store: stored() },
                scope.clone(),
            ),
            lifespan_by_id: RequestCoalescer::new(
                LifespanById { store: stored() },
                scope.clone(),
            ),
            lifespan_pages: RequestCoalescer::new(
                LifespanPages { store: stored() },
                scope.clone(),
            ),
            lifespan_chains: RequestCoalescer::new(
                LifespanChains { store: stored() },
                scope.clone(),
            ),
            analysis_by_id: RequestCoalescer::new(
                AnalysisById { store: stored() },
                scope.clone(),
            ),
            analysis_by_name: RequestCoalescer::new(
                AnalysisByName { store: stored() },
                scope.clone(),
            ),
            commits: RequestCoalescer::new(CommitLoader { vcs: history() }, scope.clone()),
            file_lists: RequestCoalescer::new(
                FileLists {
                    vcs: history(),
                    max_processes,
                },
                scope.clone(),
            ),
            file_contents: RequestCoalescer::new(
                FileContents {
                    vcs: history(),
                    max_processes,
                },
                scope.clone(),
            ),
            logs: RequestCoalescer::new(
                Logs {
                    vcs: history(),
                    max_processes,
                },
                scope.clone(),
            ),
            store,
            vcs,
            ingest: config.ingest.clone(),
            scope,
        }
    }

    pub fn scope(&self) -> &BatchScope {
        &self.scope
    }

    /// Abandon the operation. Outstanding git calls are killed; other batches
    /// finish and their results are dropped.
    pub fn cancel(&self) {
        self.scope.cancel();
    }

    // ── Occurrences ────────────────────────────────────────────────

    pub async fn occurrence(&self, id: &str) -> crate::error::Result<Occurrence> {
        let occurrence = self.occurrence_by_id.load(id.to_string()).await?;
        self.occurrence_by_position
            .prime(&occurrence.position(), occurrence.clone());
        Ok(occurrence)
    }

    /// The occurrence at `ordinal` of `lifespan`.
    pub async fn occurrence_at(
        &self,
        lifespan: &str,
        ordinal: u32,
    ) -> crate::error::Result<Occurrence> {
        let occurrence = self
            .occurrence_by_position
            .load(ChainPosition::new(lifespan, ordinal))
            .await?;
        self.occurrence_by_id
            .prime(&occurrence.id, occurrence.clone());
        Ok(occurrence)
    }

    /// The previous occurrence in the chain; `None` at ordinal 0.
    pub async fn predecessor(
        &self,
        occurrence: &Occurrence,
    ) -> crate::error::Result<Option<Occurrence>> {
        match occurrence.ordinal.checked_sub(1) {
            Some(ordinal) => self.neighbour(&occurrence.lifespan_id, ordinal).await,
            None => Ok(None),
        }
    }

    /// The next occurrence in the chain; `None` at the newest.
    pub async fn successor(
        &self,
        occurrence: &Occurrence,
    ) -> crate::error::Result<Option<Occurrence>> {
        match occurrence.ordinal.checked_add(1) {
            Some(ordinal) => self.neighbour(&occurrence.lifespan_id, ordinal).await,
            None => Ok(None),
        }
    }

    async fn neighbour(
        &self,
        lifespan: &str,
        ordinal: u32,
    ) -> crate::error::Result<Option<Occurrence>> {
        match self.occurrence_at(lifespan, ordinal).await {
            Ok(occurrence) => Ok(Some(occurrence)),
            Err(TrailError::Load(LoadError::NotFound(_))) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn occurrences(
        &self,
        filter: OccurrenceFilter,
        page: &PageArgs,
    ) -> crate::error::Result<Connection<Occurrence>> {
        if let Some(pattern) = &filter.path_pattern {
            glob::Pattern::new(pattern).map_err(|e| {
                TrailError::InvalidInput(format!("invalid path pattern {pattern:?}: {e}"))
            })?;
        }
        let key = OccurrenceShape::of(&filter).sort_key();
        let after = decode_after(page, key)?;
        let query = WindowQuery {
            filter,
            after: after.as_ref().map(|c| c.values.clone()),
            limit: window_size(page.first, after.is_some()),
        };

        let rows = self.occurrence_pages.load(query).await?;
        for occurrence in rows.iter() {
            self.prime_occurrence(occurrence);
        }
        Ok(ConnectionBuilder::new(key)
            .first(page.first)
            .after(after)
            .build(rows.to_vec()))
    }

    /// The occurrences of a lifespan in chain order.
    pub async fn instances(
        &self,
        lifespan: &str,
        page: &PageArgs,
    ) -> crate::error::Result<Connection<Occurrence>> {
        let filter = OccurrenceFilter {
            lifespan: Some(lifespan.to_string()),
            ..OccurrenceFilter::default()
        };
        self.occurrences(filter, page).await
    }

    pub async fn occurrence_lifespan(
        &self,
        occurrence: &Occurrence,
    ) -> crate::error::Result<Lifespan> {
        self.lifespan(&occurrence.lifespan_id).await
    }

    pub async fn occurrence_commit(&self, occurrence: &Occurrence) -> crate::error::Result<Commit> {
        self.commit(&occurrence.repository, &occurrence.commit_id)
            .await
    }

    pub async fn occurrence_analysis(
        &self,
        occurrence: &Occurrence,
    ) -> crate::error::Result<Analysis> {
        self.analysis(&occurrence.analysis_id).await
    }

    fn prime_occurrence(&self, occurrence: &Occurrence) {
        self.occurrence_by_id
            .prime(&occurrence.id, occurrence.clone());
        self.occurrence_by_position
            .prime(&occurrence.position(), occurrence.clone());
    }

    // ── Lifespans ──────────────────────────────────────────────────

    pub async fn lifespan(&self, id: &str) -> crate::error::Result<Lifespan> {
        Ok(self.lifespan_by_id.load(id.to_string()).await?)
    }

    pub async fn lifespans(
        &self,
        filter: LifespanFilter,
        page: &PageArgs,
    ) -> crate::error::Result<Connection<Lifespan>> {
        let key = LifespanShape::of(&filter).sort_key();
        let after = decode_after(page, key)?;
        let query = WindowQuery {
            filter,
            after: after.as_ref().map(|c| c.values.clone()),
            limit: window_size(page.first, after.is_some()),
        };

        let rows = self.lifespan_pages.load(query).await?;
        for lifespan in rows.iter() {
            self.lifespan_by_id.prime(&lifespan.id, lifespan.clone());
        }
        Ok(ConnectionBuilder::new(key)
            .first(page.first)
            .after(after)
            .build(rows.to_vec()))
    }

    /// The whole validated chain of a lifespan, oldest first.
    pub async fn lifespan_chain(&self, id: &str) -> crate::error::Result<Arc<Vec<Occurrence>>> {
        let chain = self.lifespan_chains.load(id.to_string()).await?;
        for occurrence in chain.iter() {
            self.prime_occurrence(occurrence);
        }
        Ok(chain)
    }

    pub async fn lifespan_analysis(&self, lifespan: &Lifespan) -> crate::error::Result<Analysis> {
        self.analysis(&lifespan.analysis_id).await
    }

    // ── Analyses ───────────────────────────────────────────────────

    pub async fn analysis(&self, id: &str) -> crate::error::Result<Analysis> {
        let analysis = self.analysis_by_id.load(id.to_string()).await?;
        self.analysis_by_name
            .prime(&analysis.name, analysis.clone());
        Ok(analysis)
    }

    pub async fn analysis_by_name(&self, name: &str) -> crate::error::Result<Analysis> {
        let analysis = self.analysis_by_name.load(name.to_string()).await?;
        self.analysis_by_id
            .prime(&analysis.id, analysis.clone());
        Ok(analysis)
    }

    // ── Commit history ─────────────────────────────────────────────

    pub async fn commit(&self, repository: &str, revision: &str) -> crate::error::Result<Commit> {
        Ok(self
            .commits
            .load(CommitKey {
                repository: repository.to_string(),
                revision: revision.to_string(),
            })
            .await?)
    }

    pub async fn files(
        &self,
        repository: &str,
        commit: &str,
        dir: Option<&str>,
    ) -> crate::error::Result<Arc<Vec<String>>> {
        Ok(self
            .file_lists
            .load(FileListKey {
                repository: repository.to_string(),
                commit: commit.to_string(),
                dir: dir.map(String::from),
            })
            .await?)
    }

    pub async fn file_content(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> crate::error::Result<Arc<Vec<u8>>> {
        Ok(self
            .file_contents
            .load(FileKey {
                repository: repository.to_string(),
                commit: commit.to_string(),
                path: path.to_string(),
            })
            .await?)
    }

    pub async fn log(
        &self,
        repository: &str,
        filter: LogFilter,
        skip: u32,
        max_count: Option<u32>,
    ) -> crate::error::Result<Arc<Vec<Commit>>> {
        Ok(self
            .logs
            .load(LogKey {
                repository: repository.to_string(),
                filter,
                skip,
                max_count,
            })
            .await?)
    }

    /// Not coalesced: the answer depends on the whole input set.
    pub async fn topological_order(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<Vec<String>> {
        self.vcs.topological_order(repository, revisions).await
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Validate and append one commit's worth of detections.
    ///
    /// With ancestry validation on, `commit_id` may be any revision git
    /// resolves; the full oid is what gets stored.
    pub async fn insert_code_smells(
        &self,
        batch: &CodeSmellBatch,
    ) -> crate::error::Result<InsertReport> {
        ingest::validate_batch(batch)?;
        let batch = if self.ingest.validate_ancestry {
            let batch = self.resolve_commit(batch).await?;
            self.check_ancestry(&batch).await?;
            batch
        } else {
            Cow::Borrowed(batch)
        };

        let report = self.store.insert_code_smells(&batch).await?;

        self.occurrence_pages.clear_all();
        self.lifespan_pages.clear_all();
        self.analysis_by_name.clear(&batch.analysis_name);
        self.analysis_by_id.clear(&report.analysis_id);
        for (smell, id) in batch.smells.iter().zip(&report.occurrence_ids) {
            self.occurrence_by_id.clear(id);
            self.occurrence_by_position
                .clear(&ChainPosition::new(&smell.lifespan_id, smell.ordinal));
            self.lifespan_by_id.clear(&smell.lifespan_id);
            self.lifespan_chains.clear(&smell.lifespan_id);
        }
        Ok(report)
    }

    async fn resolve_commit<'b>(
        &self,
        batch: &'b CodeSmellBatch,
    ) -> crate::error::Result<Cow<'b, CodeSmellBatch>> {
        let commit = self.commit(&batch.repository, &batch.commit_id).await?;
        if commit.oid == batch.commit_id {
            return Ok(Cow::Borrowed(batch));
        }
        debug!(revision = %batch.commit_id, oid = %commit.oid, "resolved batch commit");
        Ok(Cow::Owned(CodeSmellBatch {
            commit_id: commit.oid,
            ..batch.clone()
        }))
    }

    /// Each appended occurrence must descend from its predecessor's commit.
    async fn check_ancestry(&self, batch: &CodeSmellBatch) -> crate::error::Result<()> {
        let appended: Vec<_> = batch
            .smells
            .iter()
            .filter(|s| s.ordinal > 0)
            .collect();
        let predecessors = self
            .occurrence_by_position
            .load_many(
                appended
                    .iter()
                    .map(|s| ChainPosition::new(&s.lifespan_id, s.ordinal - 1))
                    .collect(),
            )
            .await;

        for (smell, predecessor) in appended.iter().zip(predecessors) {
            let predecessor = match predecessor {
                Ok(p) => p,
                // The store rejects the gap with a precise error.
                Err(LoadError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            if predecessor.repository != batch.repository {
                continue;
            }
            let descends = self
                .vcs
                .is_ancestor(&batch.repository, &predecessor.commit_id, &batch.commit_id)
                .await?;
            if !descends {
                return Err(IntegrityViolation::Ancestry {
                    lifespan: smell.lifespan_id.clone(),
                    ordinal: smell.ordinal,
                    predecessor: predecessor.commit_id,
                    commit: batch.commit_id.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    pub async fn delete_lifespan(&self, id: &str) -> crate::error::Result<bool> {
        let removed = self.store.delete_lifespan(id).await?;
        self.forget_stored();
        info!(lifespan = id, removed, "lifespan deleted");
        Ok(removed)
    }

    pub async fn delete_analysis(&self, id: &str) -> crate::error::Result<bool> {
        let removed = self.store.delete_analysis(id).await?;
        self.forget_stored();
        info!(analysis = id, removed, "analysis deleted");
        Ok(removed)
    }

    pub async fn delete_repository(&self, name: &str) -> crate::error::Result<u64> {
        let lifespans = self.store.delete_repository(name).await?;
        self.forget_stored();
        info!(repository = name, lifespans, "repository data deleted");
        Ok(lifespans)
    }

    pub async fn stats(&self) -> crate::error::Result<StoreStats> {
        self.store.stats().await
    }

    /// Drop every cached store read; deletes cascade too widely to track keys.
    fn forget_stored(&self) {
        self.occurrence_by_id.clear_all();
        self.occurrence_by_position.clear_all();
        self.occurrence_pages.clear_all();
        self.lifespan_by_id.clear_all();
        self.lifespan_pages.clear_all();
        self.lifespan_chains.clear_all();
        self.analysis_by_id.clear_all();
        self.analysis_by_name.clear_all();
    }
}

impl Drop for LifespanGraph {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

fn decode_after(page: &PageArgs, key: SortKey) -> crate::error::Result<Option<DecodedCursor>> {
    let Some(raw) = page.after.as_deref() else {
        return Ok(None);
    };
    let decoded = cursor::decode(raw, &[key])?;
    let ordinal = decoded.values.get(1).map(|v| v.parse::<u32>());
    if key == SortKey::BY_CHAIN_POSITION && !matches!(ordinal, Some(Ok(_))) {
        return Err(CursorError::Malformed.into());
    }
    Ok(Some(decoded))
}

#[cfg(test)]
mod tests;
