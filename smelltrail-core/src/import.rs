//! Bulk import of analyzer output.
//!
//! An import file holds one [`CodeSmellBatch`] or a JSON array of them. Each
//! batch is one `insert_code_smells` call, so a failing batch leaves the
//! batches before it committed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::TrailError;
use crate::graph::LifespanGraph;
use crate::progress::ImportProgress;
use crate::types::CodeSmellBatch;

#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Many(Vec<CodeSmellBatch>),
    One(CodeSmellBatch),
}

/// Totals of a finished import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub batches: u64,
    pub occurrences: u64,
    pub lifespans_created: u64,
}

pub fn parse_batches(text: &str) -> crate::error::Result<Vec<CodeSmellBatch>> {
    let file: ImportFile = serde_json::from_str(text)
        .map_err(|e| TrailError::InvalidInput(format!("import file is not a batch or batch list: {e}")))?;
    Ok(match file {
        ImportFile::Many(batches) => batches,
        ImportFile::One(batch) => vec![batch],
    })
}

/// Insert `batches` one at a time.
///
/// With `order_by_history`, batches are first replayed parents-before-children
/// per repository, so a file listing commits newest first still appends each
/// lifespan in chain order. Batches of the same commit keep their file order.
pub async fn import(
    graph: &LifespanGraph,
    mut batches: Vec<CodeSmellBatch>,
    order_by_history: bool,
    progress: &dyn ImportProgress,
) -> crate::error::Result<ImportSummary> {
    if order_by_history {
        order_batches(graph, &mut batches).await?;
    }

    progress.start(batches.len() as u64);
    let mut summary = ImportSummary::default();
    for batch in &batches {
        let report = match graph.insert_code_smells(batch).await {
            Ok(report) => report,
            Err(e) => {
                progress.finish();
                return Err(e);
            }
        };
        summary.batches += 1;
        summary.occurrences += report.occurrence_ids.len() as u64;
        summary.lifespans_created += report.lifespans_created;
        progress.inserted(batch, &report);
    }
    progress.finish();

    info!(
        batches = summary.batches,
        occurrences = summary.occurrences,
        lifespans_created = summary.lifespans_created,
        "import complete"
    );
    Ok(summary)
}

async fn order_batches(
    graph: &LifespanGraph,
    batches: &mut [CodeSmellBatch],
) -> crate::error::Result<()> {
    let mut commits: Vec<(String, Vec<String>)> = Vec::new();
    for batch in batches.iter() {
        let slot = match commits.iter().position(|(repo, _)| *repo == batch.repository) {
            Some(i) => i,
            None => {
                commits.push((batch.repository.clone(), Vec::new()));
                commits.len() - 1
            }
        };
        if !commits[slot].1.contains(&batch.commit_id) {
            commits[slot].1.push(batch.commit_id.clone());
        }
    }

    let mut rank: HashMap<(String, String), (usize, usize)> = HashMap::new();
    for (repo_index, (repository, revisions)) in commits.iter().enumerate() {
        let ordered = graph.topological_order(repository, revisions).await?;
        for (i, commit) in ordered.into_iter().enumerate() {
            rank.insert((repository.clone(), commit), (repo_index, i));
        }
    }

    batches.sort_by_key(|b| {
        rank.get(&(b.repository.clone(), b.commit_id.clone()))
            .copied()
            .unwrap_or((usize::MAX, usize::MAX))
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_batch_and_list() {
        let one = r#"{"repository":"demo","commitId":"c1","analysisName":"pmd","smells":[]}"#;
        assert_eq!(parse_batches(one).unwrap().len(), 1);

        let many = format!("[{one},{one}]");
        assert_eq!(parse_batches(&many).unwrap().len(), 2);
    }

    #[test]
    fn rejects_unknown_shape() {
        let err = parse_batches(r#"{"commit":"c1"}"#).unwrap_err();
        assert!(matches!(err, TrailError::InvalidInput(_)));
    }

    #[test]
    fn smell_defaults_apply() {
        let text = r#"{
            "repository": "demo",
            "commitId": "c1",
            "analysisName": "pmd",
            "smells": [{ "lifespanId": "L1", "ordinal": 0, "kind": "GodClass" }]
        }"#;
        let batches = parse_batches(text).unwrap();
        let smell = &batches[0].smells[0];
        assert!(smell.id.is_none());
        assert!(smell.message.is_none());
        assert!(smell.locations.is_empty());
    }
}
