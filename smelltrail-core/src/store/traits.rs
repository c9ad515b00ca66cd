use crate::types::{
    Analysis, ChainPosition, ChainRows, CodeSmellBatch, InsertReport, Lifespan, LifespanFilter,
    Occurrence, OccurrenceFilter, StoreStats,
};

use super::shape::{LifespanShape, OccurrenceShape};

/// One page request inside a bulk window query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowQuery<F> {
    pub filter: F,
    /// Sort-key values of the `after` cursor; rows at or after them are returned.
    pub after: Option<Vec<String>>,
    /// Maximum rows to return; `None` is unbounded.
    pub limit: Option<u32>,
}

/// The relational store behind the lifespan graph.
///
/// Every read is a bulk function: it takes an ordered list of inputs and
/// returns exactly one entry per input in the same order. A missing entity is
/// `None`, never an error.
#[async_trait::async_trait]
pub trait RelationalStore: Send + Sync {
    // ── Point lookups ──────────────────────────────────────────────

    async fn occurrences_by_id(&self, ids: &[String])
    -> crate::error::Result<Vec<Option<Occurrence>>>;

    async fn occurrences_by_position(
        &self,
        positions: &[ChainPosition],
    ) -> crate::error::Result<Vec<Option<Occurrence>>>;

    async fn lifespans_by_id(&self, ids: &[String]) -> crate::error::Result<Vec<Option<Lifespan>>>;

    async fn analyses_by_id(&self, ids: &[String]) -> crate::error::Result<Vec<Option<Analysis>>>;

    async fn analyses_by_name(&self, names: &[String])
    -> crate::error::Result<Vec<Option<Analysis>>>;

    // ── Windows ────────────────────────────────────────────────────

    /// One ordered window per query, all of `shape`.
    ///
    /// A query that matches nothing yields `vec![None]`.
    async fn occurrence_windows(
        &self,
        shape: OccurrenceShape,
        queries: &[WindowQuery<OccurrenceFilter>],
    ) -> crate::error::Result<Vec<Vec<Option<Occurrence>>>>;

    async fn lifespan_windows(
        &self,
        shape: LifespanShape,
        queries: &[WindowQuery<LifespanFilter>],
    ) -> crate::error::Result<Vec<Vec<Option<Lifespan>>>>;

    /// Chains walked from ordinal 0, one per lifespan id; `None` for unknown lifespans.
    async fn lifespan_chains(&self, ids: &[String]) -> crate::error::Result<Vec<Option<ChainRows>>>;

    // ── Mutations ──────────────────────────────────────────────────

    /// Append a batch of detections in one transaction.
    ///
    /// Lifespans are created on first sight. Every occurrence must land at
    /// the next free ordinal of its lifespan. Any failure rolls back the batch.
    async fn insert_code_smells(&self, batch: &CodeSmellBatch)
    -> crate::error::Result<InsertReport>;

    /// Delete a lifespan and its occurrences. Returns whether it existed.
    async fn delete_lifespan(&self, id: &str) -> crate::error::Result<bool>;

    /// Delete an analysis with everything it produced. Returns whether it existed.
    async fn delete_analysis(&self, id: &str) -> crate::error::Result<bool>;

    /// Delete every lifespan recorded for a repository. Returns lifespans removed.
    async fn delete_repository(&self, name: &str) -> crate::error::Result<u64>;

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self) -> crate::error::Result<StoreStats>;
}
