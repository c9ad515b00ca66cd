use std::collections::HashSet;

use crate::error::TrailError;
use crate::types::CodeSmellBatch;

/// Structural checks that need no store or repository access.
pub(crate) fn validate_batch(batch: &CodeSmellBatch) -> crate::error::Result<()> {
    let required = [
        ("repository", batch.repository.as_str()),
        ("commitId", batch.commit_id.as_str()),
        ("analysisName", batch.analysis_name.as_str()),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(TrailError::InvalidInput(format!("batch {field} must not be empty")));
        }
    }

    let mut lifespans = HashSet::new();
    let mut ids = HashSet::new();
    for (i, smell) in batch.smells.iter().enumerate() {
        if smell.lifespan_id.trim().is_empty() {
            return Err(TrailError::InvalidInput(format!(
                "smell {i}: lifespanId must not be empty"
            )));
        }
        if smell.kind.trim().is_empty() {
            return Err(TrailError::InvalidInput(format!(
                "smell {i}: kind must not be empty"
            )));
        }
        if !lifespans.insert(smell.lifespan_id.as_str()) {
            return Err(TrailError::InvalidInput(format!(
                "lifespan {} appears more than once in one commit",
                smell.lifespan_id
            )));
        }
        if let Some(id) = &smell.id {
            if id.trim().is_empty() {
                return Err(TrailError::InvalidInput(format!("smell {i}: id must not be empty")));
            }
            if !ids.insert(id.as_str()) {
                return Err(TrailError::InvalidInput(format!("duplicate occurrence id {id}")));
            }
        }
        for location in &smell.locations {
            if location.range.end < location.range.start {
                return Err(TrailError::InvalidInput(format!(
                    "smell {i}: range in {} ends before it starts",
                    location.file
                )));
            }
        }
    }
    Ok(())
}
