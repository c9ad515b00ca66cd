use crate::error::IntegrityViolation;
use crate::types::{ChainRows, Occurrence};

/// Check a materialized chain and return it in ordinal order.
///
/// The walk must start at ordinal 0, step by exactly one, stay inside
/// `lifespan`, and reach every occurrence the lifespan owns.
pub(crate) fn validate_chain(
    lifespan: &str,
    rows: ChainRows,
) -> Result<Vec<Occurrence>, IntegrityViolation> {
    for (expected, occurrence) in (0u32..).zip(&rows.reachable) {
        if occurrence.lifespan_id != lifespan {
            return Err(IntegrityViolation::ChainMismatch {
                lifespan: lifespan.to_string(),
                ordinal: occurrence.ordinal,
                actual: occurrence.lifespan_id.clone(),
            });
        }
        if occurrence.ordinal != expected {
            return Err(IntegrityViolation::OrdinalGap {
                lifespan: lifespan.to_string(),
                expected,
                found: occurrence.ordinal,
            });
        }
    }
    if rows.reachable.len() != rows.total {
        return Err(IntegrityViolation::Truncated {
            lifespan: lifespan.to_string(),
            reachable: rows.reachable.len(),
            total: rows.total,
        });
    }
    Ok(rows.reachable)
}
