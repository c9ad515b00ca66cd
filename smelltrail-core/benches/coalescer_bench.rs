// Benchmark request coalescing: fan-in of point reads and sibling page windows.

use std::future::Future;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use smelltrail_core::config::SmelltrailConfig;
use smelltrail_core::graph::LifespanGraph;
use smelltrail_core::store::{RelationalStore, SqliteStore};
use smelltrail_core::types::{CodeSmellBatch, NewCodeSmell, PageArgs};
use smelltrail_core::vcs::GitRepositories;

/// Run every future as its own task and collect the outputs in order.
async fn join_all<F>(futures: Vec<F>) -> Vec<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handles: Vec<_> = futures.into_iter().map(tokio::spawn).collect();
    let mut out = Vec::with_capacity(handles.len());
    for handle in handles {
        out.push(handle.await.unwrap());
    }
    out
}

/// `lifespans` chains of `depth` occurrences each, one commit per ordinal.
fn seeded_store(rt: &tokio::runtime::Runtime, lifespans: usize, depth: u32) -> Arc<SqliteStore> {
    rt.block_on(async {
        let store = SqliteStore::in_memory().unwrap();
        for ordinal in 0..depth {
            let smells = (0..lifespans)
                .map(|l| NewCodeSmell {
                    id: None,
                    lifespan_id: format!("L{l}"),
                    ordinal,
                    kind: "LongMethod".into(),
                    message: None,
                    locations: Vec::new(),
                })
                .collect();
            store
                .insert_code_smells(&CodeSmellBatch {
                    repository: "bench".into(),
                    commit_id: format!("c{ordinal}"),
                    analysis_name: "bench".into(),
                    smells,
                })
                .await
                .unwrap();
        }
        Arc::new(store)
    })
}

fn graph(store: &Arc<SqliteStore>, delay_ms: u64) -> Arc<LifespanGraph> {
    let mut config = SmelltrailConfig::default();
    config.batch.delay_ms = delay_ms;
    Arc::new(LifespanGraph::new(
        Arc::clone(store) as Arc<dyn RelationalStore>,
        Arc::new(GitRepositories::default()),
        &config,
    ))
}

fn bench_point_reads(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = seeded_store(&rt, 500, 4);
    let mut group = c.benchmark_group("coalesced_point_reads");

    for keys in [10_usize, 100, 500] {
        group.bench_with_input(BenchmarkId::new("keys", keys), &keys, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let graph = graph(&store, 0);
                    let reads = (0..n)
                        .map(|l| {
                            let graph = Arc::clone(&graph);
                            async move { graph.occurrence_at(&format!("L{l}"), 3).await }
                        })
                        .collect();
                    for result in join_all(reads).await {
                        result.unwrap();
                    }
                });
            });
        });
    }
    group.finish();
}

fn bench_sibling_pages(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = seeded_store(&rt, 200, 8);

    c.bench_function("coalesced_instances_pages", |b| {
        b.iter(|| {
            rt.block_on(async {
                let graph = graph(&store, 0);
                let pages = (0..200)
                    .map(|l| {
                        let graph = Arc::clone(&graph);
                        async move { graph.instances(&format!("L{l}"), &PageArgs::first(5)).await }
                    })
                    .collect();
                for page in join_all(pages).await {
                    assert_eq!(page.unwrap().len(), 5);
                }
            });
        });
    });
}

criterion_group!(benches, bench_point_reads, bench_sibling_pages);
criterion_main!(benches);
