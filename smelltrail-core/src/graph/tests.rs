use std::collections::HashMap;
use std::sync::Mutex;

use chrono::DateTime;

use super::*;
use crate::error::{NotFound, VcsError};
use crate::store::SqliteStore;
use crate::types::{ChainRows, Location, NewCodeSmell, Position, Range};

// ── Fixtures ───────────────────────────────────────────────────────

/// Store wrapper that records which bulk reads were issued.
struct CountingStore {
    inner: SqliteStore,
    calls: Mutex<Vec<&'static str>>,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }
}

#[async_trait::async_trait]
impl RelationalStore for CountingStore {
    async fn occurrences_by_id(
        &self,
        ids: &[String],
    ) -> crate::error::Result<Vec<Option<Occurrence>>> {
        self.record("occurrences_by_id");
        self.inner.occurrences_by_id(ids).await
    }

    async fn occurrences_by_position(
        &self,
        positions: &[ChainPosition],
    ) -> crate::error::Result<Vec<Option<Occurrence>>> {
        self.record("occurrences_by_position");
        self.inner.occurrences_by_position(positions).await
    }

    async fn lifespans_by_id(&self, ids: &[String]) -> crate::error::Result<Vec<Option<Lifespan>>> {
        self.record("lifespans_by_id");
        self.inner.lifespans_by_id(ids).await
    }

    async fn analyses_by_id(&self, ids: &[String]) -> crate::error::Result<Vec<Option<Analysis>>> {
        self.record("analyses_by_id");
        self.inner.analyses_by_id(ids).await
    }

    async fn analyses_by_name(
        &self,
        names: &[String],
    ) -> crate::error::Result<Vec<Option<Analysis>>> {
        self.record("analyses_by_name");
        self.inner.analyses_by_name(names).await
    }

    async fn occurrence_windows(
        &self,
        shape: OccurrenceShape,
        queries: &[WindowQuery<OccurrenceFilter>],
    ) -> crate::error::Result<Vec<Vec<Option<Occurrence>>>> {
        self.record("occurrence_windows");
        self.inner.occurrence_windows(shape, queries).await
    }

    async fn lifespan_windows(
        &self,
        shape: LifespanShape,
        queries: &[WindowQuery<LifespanFilter>],
    ) -> crate::error::Result<Vec<Vec<Option<Lifespan>>>> {
        self.record("lifespan_windows");
        self.inner.lifespan_windows(shape, queries).await
    }

    async fn lifespan_chains(&self, ids: &[String]) -> crate::error::Result<Vec<Option<ChainRows>>> {
        self.record("lifespan_chains");
        self.inner.lifespan_chains(ids).await
    }

    async fn insert_code_smells(
        &self,
        batch: &CodeSmellBatch,
    ) -> crate::error::Result<InsertReport> {
        self.inner.insert_code_smells(batch).await
    }

    async fn delete_lifespan(&self, id: &str) -> crate::error::Result<bool> {
        self.inner.delete_lifespan(id).await
    }

    async fn delete_analysis(&self, id: &str) -> crate::error::Result<bool> {
        self.inner.delete_analysis(id).await
    }

    async fn delete_repository(&self, name: &str) -> crate::error::Result<u64> {
        self.inner.delete_repository(name).await
    }

    async fn stats(&self) -> crate::error::Result<StoreStats> {
        self.inner.stats().await
    }
}

/// A single linear history `c1 → c2 → … → cN` in repository `demo`.
struct LinearHistory {
    commits: Vec<String>,
    lookups: Mutex<usize>,
}

impl LinearHistory {
    fn new(n: usize) -> Self {
        Self {
            commits: (1..=n).map(|i| format!("c{i}")).collect(),
            lookups: Mutex::new(0),
        }
    }

    fn index(&self, repository: &str, revision: &str) -> crate::error::Result<usize> {
        if repository != "demo" {
            return Err(VcsError::UnknownRepository(repository.to_string()).into());
        }
        if revision == "HEAD" {
            return Ok(self.commits.len() - 1);
        }
        self.commits
            .iter()
            .position(|c| c == revision)
            .ok_or_else(|| {
                VcsError::UnknownRevision {
                    repository: repository.to_string(),
                    revision: revision.to_string(),
                }
                .into()
            })
    }

    fn commit(&self, i: usize) -> Commit {
        let author = crate::types::Signature {
            name: "Dev".into(),
            email: "dev@example.com".into(),
            date: DateTime::parse_from_rfc3339("2024-03-01T12:00:00+01:00").unwrap(),
        };
        Commit {
            oid: self.commits[i].clone(),
            message: format!("commit {}\n", i + 1),
            author: author.clone(),
            committer: author,
            parents: i.checked_sub(1).map(|p| self.commits[p].clone()).into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl CommitHistoryAdapter for LinearHistory {
    async fn get_commits(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<HashMap<String, Commit>> {
        *self.lookups.lock().unwrap() += 1;
        let mut found = HashMap::new();
        for revision in revisions {
            match self.index(repository, revision) {
                Ok(i) => {
                    found.insert(revision.clone(), self.commit(i));
                }
                Err(TrailError::Vcs(VcsError::UnknownRevision { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    async fn list_files(
        &self,
        repository: &str,
        commit: &str,
        _dir: Option<&str>,
    ) -> crate::error::Result<Vec<String>> {
        self.index(repository, commit)?;
        Ok(vec!["src/a.rs".into()])
    }

    async fn file_content(
        &self,
        repository: &str,
        commit: &str,
        path: &str,
    ) -> crate::error::Result<Vec<u8>> {
        self.index(repository, commit)?;
        Ok(format!("// {path} at {commit}\n").into_bytes())
    }

    async fn log(
        &self,
        repository: &str,
        _filter: &LogFilter,
        skip: u32,
        max_count: Option<u32>,
    ) -> crate::error::Result<Vec<Commit>> {
        self.index(repository, "c1")?;
        let newest_first = (0..self.commits.len()).rev().map(|i| self.commit(i));
        let take = max_count.map_or(usize::MAX, |n| n as usize);
        Ok(newest_first.skip(skip as usize).take(take).collect())
    }

    async fn topological_order(
        &self,
        repository: &str,
        revisions: &[String],
    ) -> crate::error::Result<Vec<String>> {
        let mut indexed = revisions
            .iter()
            .map(|r| Ok((self.index(repository, r)?, r.clone())))
            .collect::<crate::error::Result<Vec<_>>>()?;
        indexed.sort();
        Ok(indexed.into_iter().map(|(_, r)| r).collect())
    }

    async fn is_ancestor(
        &self,
        repository: &str,
        ancestor: &str,
        descendant: &str,
    ) -> crate::error::Result<bool> {
        Ok(self.index(repository, ancestor)? <= self.index(repository, descendant)?)
    }
}

fn config() -> SmelltrailConfig {
    let mut config = SmelltrailConfig::default();
    config.batch.delay_ms = 1;
    config
}

fn graph_over(store: &Arc<CountingStore>, history: &Arc<LinearHistory>) -> LifespanGraph {
    LifespanGraph::new(
        Arc::clone(store) as Arc<dyn RelationalStore>,
        Arc::clone(history) as Arc<dyn CommitHistoryAdapter>,
        &config(),
    )
}

fn fixture() -> (Arc<CountingStore>, Arc<LinearHistory>, LifespanGraph) {
    let store = Arc::new(CountingStore::new());
    let history = Arc::new(LinearHistory::new(5));
    let graph = graph_over(&store, &history);
    (store, history, graph)
}

fn smell(lifespan: &str, ordinal: u32) -> NewCodeSmell {
    NewCodeSmell {
        id: Some(format!("{lifespan}-{ordinal}")),
        lifespan_id: lifespan.into(),
        ordinal,
        kind: "GodClass".into(),
        message: Some("too many responsibilities".into()),
        locations: vec![Location {
            file: "src/a.rs".into(),
            range: Range {
                start: Position {
                    line: 3,
                    character: 0,
                },
                end: Position {
                    line: 40,
                    character: 1,
                },
            },
        }],
    }
}

fn batch(commit: &str, smells: Vec<NewCodeSmell>) -> CodeSmellBatch {
    CodeSmellBatch {
        repository: "demo".into(),
        commit_id: commit.into(),
        analysis_name: "pmd".into(),
        smells,
    }
}

/// L1 at c1, c2, c3; L2 at c2.
async fn seed(graph: &LifespanGraph) {
    graph
        .insert_code_smells(&batch("c1", vec![smell("L1", 0)]))
        .await
        .unwrap();
    graph
        .insert_code_smells(&batch("c2", vec![smell("L1", 1), smell("L2", 0)]))
        .await
        .unwrap();
    graph
        .insert_code_smells(&batch("c3", vec![smell("L1", 2)]))
        .await
        .unwrap();
}

fn ids(connection: &Connection<Occurrence>) -> Vec<&str> {
    connection.nodes().map(|o| o.id.as_str()).collect()
}

// ── Reads ──────────────────────────────────────────────────────────

#[tokio::test]
async fn commit_query_and_chain_navigation() {
    let (_, _, graph) = fixture();
    graph
        .insert_code_smells(&batch("c1", vec![smell("L1", 0)]))
        .await
        .unwrap();
    graph
        .insert_code_smells(&batch("c2", vec![smell("L1", 1)]))
        .await
        .unwrap();

    let at_c2 = graph
        .occurrences(
            OccurrenceFilter {
                commit: Some("c2".into()),
                ..OccurrenceFilter::default()
            },
            &PageArgs::first(10),
        )
        .await
        .unwrap();
    assert_eq!(ids(&at_c2), vec!["L1-1"]);

    let second = at_c2.nodes().next().unwrap();
    let first = graph.predecessor(second).await.unwrap().unwrap();
    assert_eq!(first.id, "L1-0");
    assert_eq!(first.commit_id, "c1");
    assert!(graph.predecessor(&first).await.unwrap().is_none());
    assert!(graph.successor(second).await.unwrap().is_none());

    let instances = graph.instances("L1", &PageArgs::first(10)).await.unwrap();
    assert_eq!(ids(&instances), vec!["L1-0", "L1-1"]);
    assert!(!instances.page_info().has_next_page);
}

#[tokio::test]
async fn concurrent_point_reads_share_one_bulk_call() {
    let (store, _, graph) = fixture();
    seed(&graph).await;
    let base = store.count("occurrences_by_position");

    let (a, b, c, again) = tokio::join!(
        graph.occurrence_at("L1", 0),
        graph.occurrence_at("L1", 2),
        graph.occurrence_at("L2", 0),
        graph.occurrence_at("L1", 0),
    );
    assert_eq!(a.unwrap().commit_id, "c1");
    assert_eq!(b.unwrap().commit_id, "c3");
    assert_eq!(c.unwrap().commit_id, "c2");
    assert_eq!(again.unwrap().id, "L1-0");

    assert_eq!(store.count("occurrences_by_position"), base + 1);
    // Cached for the rest of the operation.
    graph.occurrence_at("L1", 2).await.unwrap();
    assert_eq!(store.count("occurrences_by_position"), base + 1);
}

#[tokio::test]
async fn point_reads_prime_the_other_access_path() {
    let (store, _, graph) = fixture();
    seed(&graph).await;
    let base = store.count("occurrences_by_position");

    let occurrence = graph.occurrence("L1-1").await.unwrap();
    let same = graph
        .occurrence_at(&occurrence.lifespan_id, occurrence.ordinal)
        .await
        .unwrap();
    assert_eq!(occurrence, same);
    assert_eq!(store.count("occurrences_by_position"), base);
}

#[tokio::test]
async fn unknown_entities_are_not_found() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let err = graph.occurrence("nope").await.unwrap_err();
    assert!(err.not_found().is_some());
    let err = graph.occurrence_at("L2", 5).await.unwrap_err();
    assert!(matches!(
        err,
        TrailError::Load(LoadError::NotFound(NotFound::ChainPosition { ordinal: 5, .. }))
    ));
    assert!(graph.lifespan("L9").await.unwrap_err().not_found().is_some());
    assert!(graph.analysis_by_name("sonar").await.unwrap_err().not_found().is_some());
}

#[tokio::test]
async fn chain_is_validated_and_primes_point_reads() {
    let (store, _, graph) = fixture();
    seed(&graph).await;
    let base = store.count("occurrences_by_position");

    let chain = graph.lifespan_chain("L1").await.unwrap();
    let commits: Vec<&str> = chain.iter().map(|o| o.commit_id.as_str()).collect();
    assert_eq!(commits, vec!["c1", "c2", "c3"]);

    let middle = graph.occurrence_at("L1", 1).await.unwrap();
    assert_eq!(graph.successor(&middle).await.unwrap().unwrap().ordinal, 2);
    assert_eq!(store.count("occurrences_by_position"), base);
}

#[tokio::test]
async fn related_entities_resolve() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let occurrence = graph.occurrence("L2-0").await.unwrap();
    let lifespan = graph.occurrence_lifespan(&occurrence).await.unwrap();
    assert_eq!(lifespan.kind, "GodClass");
    assert_eq!(lifespan.repository, "demo");

    let analysis = graph.occurrence_analysis(&occurrence).await.unwrap();
    assert_eq!(analysis.name, "pmd");
    assert_eq!(graph.lifespan_analysis(&lifespan).await.unwrap(), analysis);

    let commit = graph.occurrence_commit(&occurrence).await.unwrap();
    assert_eq!(commit.oid, "c2");
    assert_eq!(commit.parents, vec!["c1".to_string()]);
    assert_eq!(commit.subject(), "commit 2");
}

// ── Pagination ─────────────────────────────────────────────────────

#[tokio::test]
async fn instances_page_forward_with_cursors() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let first = graph.instances("L1", &PageArgs::first(2)).await.unwrap();
    assert_eq!(ids(&first), vec!["L1-0", "L1-1"]);
    assert!(first.page_info().has_next_page);

    let cursor = first.end_cursor().unwrap().to_string();
    let rest = graph
        .instances("L1", &PageArgs::first(2).after(cursor))
        .await
        .unwrap();
    assert_eq!(ids(&rest), vec!["L1-2"]);
    assert!(!rest.page_info().has_next_page);
}

#[tokio::test]
async fn filters_narrow_the_page() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let analysis = graph.analysis_by_name("pmd").await.unwrap();
    let all = graph
        .occurrences(
            OccurrenceFilter {
                analysis: Some(analysis.id.clone()),
                ..OccurrenceFilter::default()
            },
            &PageArgs::default(),
        )
        .await
        .unwrap();
    assert_eq!(all.len(), 4);

    let in_src = graph
        .occurrences(
            OccurrenceFilter {
                path_pattern: Some("src/**".into()),
                kind: Some("GodClass".into()),
                ..OccurrenceFilter::default()
            },
            &PageArgs::first(10),
        )
        .await
        .unwrap();
    assert_eq!(in_src.len(), 4);

    for (pattern, expected) in [("src/**/*.rs", 4), ("[!t]*/*.rs", 4), ("[!s]*/*.rs", 0)] {
        let page = graph
            .occurrences(
                OccurrenceFilter {
                    path_pattern: Some(pattern.into()),
                    ..OccurrenceFilter::default()
                },
                &PageArgs::first(10),
            )
            .await
            .unwrap();
        assert_eq!(page.len(), expected, "{pattern}");
    }

    let elsewhere = graph
        .occurrences(
            OccurrenceFilter {
                file: Some("tests/b.rs".into()),
                ..OccurrenceFilter::default()
            },
            &PageArgs::first(10),
        )
        .await
        .unwrap();
    assert!(elsewhere.is_empty());
    assert!(!elsewhere.page_info().has_next_page);
}

#[tokio::test]
async fn sibling_pages_share_one_window_query() {
    let (store, _, graph) = fixture();
    seed(&graph).await;

    let page = PageArgs::first(1);
    let (l1, l2) = tokio::join!(graph.instances("L1", &page), graph.instances("L2", &page));
    assert_eq!(ids(&l1.unwrap()), vec!["L1-0"]);
    assert_eq!(ids(&l2.unwrap()), vec!["L2-0"]);
    assert_eq!(store.count("occurrence_windows"), 1);
}

#[tokio::test]
async fn lifespans_page_by_filter() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let page = graph
        .lifespans(
            LifespanFilter {
                repository: Some("demo".into()),
                ..LifespanFilter::default()
            },
            &PageArgs::first(1),
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert!(page.page_info().has_next_page);

    let cursor = page.end_cursor().unwrap().to_string();
    let next = graph
        .lifespans(LifespanFilter::default(), &PageArgs::first(5).after(cursor))
        .await
        .unwrap();
    assert_eq!(next.len(), 1);
    assert_ne!(next.nodes().next().unwrap().id, page.nodes().next().unwrap().id);
}

#[tokio::test]
async fn bad_arguments_are_rejected() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let err = graph
        .occurrences(
            OccurrenceFilter {
                path_pattern: Some("src/[".into()),
                ..OccurrenceFilter::default()
            },
            &PageArgs::first(1),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TrailError::InvalidInput(_)));

    let err = graph
        .instances("L1", &PageArgs::first(1).after("not a cursor"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrailError::Cursor(CursorError::Malformed)));

    // A by-id cursor does not fit a chain-ordered field.
    let by_id = graph
        .occurrences(OccurrenceFilter::default(), &PageArgs::first(1))
        .await
        .unwrap();
    let cursor = by_id.end_cursor().unwrap().to_string();
    let err = graph
        .instances("L1", &PageArgs::first(1).after(cursor))
        .await
        .unwrap_err();
    assert!(matches!(err, TrailError::Cursor(CursorError::UnexpectedKey(_))));
}

// ── Writes ─────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_invalidates_cached_pages() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    let before = graph.instances("L1", &PageArgs::default()).await.unwrap();
    assert_eq!(before.len(), 3);
    let newest = graph.occurrence_at("L1", 2).await.unwrap();
    assert!(graph.successor(&newest).await.unwrap().is_none());

    graph
        .insert_code_smells(&batch("c4", vec![smell("L1", 3)]))
        .await
        .unwrap();

    let after = graph.instances("L1", &PageArgs::default()).await.unwrap();
    assert_eq!(after.len(), 4);
    assert_eq!(graph.successor(&newest).await.unwrap().unwrap().commit_id, "c4");
    assert_eq!(graph.lifespan_chain("L1").await.unwrap().len(), 4);
}

#[tokio::test]
async fn delete_invalidates_cached_reads() {
    let (_, _, graph) = fixture();
    seed(&graph).await;

    assert_eq!(graph.lifespan("L2").await.unwrap().id, "L2");
    assert_eq!(graph.occurrence("L2-0").await.unwrap().ordinal, 0);

    assert!(graph.delete_lifespan("L2").await.unwrap());
    assert!(!graph.delete_lifespan("L2").await.unwrap());
    assert!(graph.lifespan("L2").await.unwrap_err().not_found().is_some());
    assert!(graph.occurrence("L2-0").await.unwrap_err().not_found().is_some());

    assert_eq!(graph.delete_repository("demo").await.unwrap(), 1);
    let stats = graph.stats().await.unwrap();
    assert_eq!(stats.lifespans, 0);
    assert_eq!(stats.occurrences, 0);
}

#[tokio::test]
async fn out_of_history_append_is_rejected() {
    let (_, _, graph) = fixture();
    graph
        .insert_code_smells(&batch("c3", vec![smell("L1", 0)]))
        .await
        .unwrap();

    let err = graph
        .insert_code_smells(&batch("c2", vec![smell("L1", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrailError::Integrity(IntegrityViolation::Ancestry { ordinal: 1, .. })
    ));
    assert_eq!(graph.stats().await.unwrap().occurrences, 1);
}

#[tokio::test]
async fn unknown_commit_is_rejected_when_validating() {
    let (_, _, graph) = fixture();
    let err = graph
        .insert_code_smells(&batch("c99", vec![smell("L1", 0)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TrailError::Load(LoadError::NotFound(NotFound::Commit { .. }))
    ));
}

#[tokio::test]
async fn symbolic_revisions_are_stored_as_resolved_oids() {
    let (_, _, graph) = fixture();
    graph
        .insert_code_smells(&batch("c1", vec![smell("L1", 0)]))
        .await
        .unwrap();
    graph
        .insert_code_smells(&batch("HEAD", vec![smell("L1", 1)]))
        .await
        .unwrap();

    let head = graph.occurrence("L1-1").await.unwrap();
    assert_eq!(head.commit_id, "c3");
    let at_c3 = graph
        .occurrences(
            OccurrenceFilter {
                commit: Some("c3".into()),
                ..OccurrenceFilter::default()
            },
            &PageArgs::first(10),
        )
        .await
        .unwrap();
    assert_eq!(ids(&at_c3), vec!["L1-1"]);
}

#[tokio::test]
async fn ancestry_check_can_be_disabled() {
    let store = Arc::new(CountingStore::new());
    let history = Arc::new(LinearHistory::new(3));
    let mut config = config();
    config.ingest.validate_ancestry = false;
    let graph = LifespanGraph::new(store, Arc::clone(&history) as Arc<dyn CommitHistoryAdapter>, &config);

    graph
        .insert_code_smells(&batch("c99", vec![smell("L1", 0)]))
        .await
        .unwrap();
    assert_eq!(*history.lookups.lock().unwrap(), 0);
}

#[tokio::test]
async fn malformed_batch_never_reaches_the_store() {
    let (_, _, graph) = fixture();
    let err = graph
        .insert_code_smells(&batch("c1", vec![smell("L1", 0), smell("L1", 1)]))
        .await
        .unwrap_err();
    assert!(matches!(err, TrailError::InvalidInput(_)));
    assert_eq!(graph.stats().await.unwrap().occurrences, 0);
}

// ── History ────────────────────────────────────────────────────────

#[tokio::test]
async fn history_reads_go_through_the_adapter() {
    let (_, history, graph) = fixture();

    let (a, b) = tokio::join!(graph.commit("demo", "c1"), graph.commit("demo", "c4"));
    assert_eq!(a.unwrap().oid, "c1");
    assert_eq!(b.unwrap().parents, vec!["c3".to_string()]);
    assert_eq!(*history.lookups.lock().unwrap(), 1);

    let files = graph.files("demo", "c2", None).await.unwrap();
    assert_eq!(files.as_slice(), ["src/a.rs".to_string()]);
    let content = graph.file_content("demo", "c2", "src/a.rs").await.unwrap();
    assert_eq!(content.as_slice(), b"// src/a.rs at c2\n");

    let log = graph.log("demo", LogFilter::default(), 1, Some(2)).await.unwrap();
    let oids: Vec<&str> = log.iter().map(|c| c.oid.as_str()).collect();
    assert_eq!(oids, vec!["c4", "c3"]);

    let ordered = graph
        .topological_order("demo", &["c3".into(), "c1".into(), "c2".into()])
        .await
        .unwrap();
    assert_eq!(ordered, vec!["c1", "c2", "c3"]);
}

#[tokio::test]
async fn failing_repository_does_not_fail_siblings() {
    let (_, _, graph) = fixture();
    let (good, bad) = tokio::join!(graph.commit("demo", "c2"), graph.commit("other", "c2"));
    assert_eq!(good.unwrap().oid, "c2");
    assert!(matches!(
        bad,
        Err(TrailError::Load(LoadError::NotFound(NotFound::Repository(_))))
    ));
}

#[tokio::test]
async fn cancelled_graph_settles_new_loads() {
    let (_, _, graph) = fixture();
    graph.cancel();
    assert!(graph.scope().is_cancelled());
    let err = graph.occurrence("L1-0").await.unwrap_err();
    assert!(matches!(err, TrailError::Load(LoadError::Cancelled(_))));
}
