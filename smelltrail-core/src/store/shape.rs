//! Query shapes: which filters a page request sets.
//!
//! Page requests with the same shape share one bulk statement. Each filter
//! field maps to a fixed SQL predicate over a per-input JSON object `q.v`,
//! so statements are assembled only from the fragments below and are stable
//! enough for `prepare_cached`.

use std::fmt;

use crate::cursor::SortKey;
use crate::types::{LifespanFilter, OccurrenceFilter};

use super::schema::{LIFESPAN_COLUMNS, OCCURRENCE_COLUMNS};

/// Filterable attributes of an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OccurrenceField {
    Repository,
    Analysis,
    Commit,
    Lifespan,
    Kind,
    File,
    PathPattern,
}

impl OccurrenceField {
    pub const ALL: [Self; 7] = [
        Self::Repository,
        Self::Analysis,
        Self::Commit,
        Self::Lifespan,
        Self::Kind,
        Self::File,
        Self::PathPattern,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Analysis => "analysis",
            Self::Commit => "commit",
            Self::Lifespan => "lifespan",
            Self::Kind => "kind",
            Self::File => "file",
            Self::PathPattern => "pathPattern",
        }
    }

    fn is_set(self, filter: &OccurrenceFilter) -> bool {
        match self {
            Self::Repository => filter.repository.is_some(),
            Self::Analysis => filter.analysis.is_some(),
            Self::Commit => filter.commit.is_some(),
            Self::Lifespan => filter.lifespan.is_some(),
            Self::Kind => filter.kind.is_some(),
            Self::File => filter.file.is_some(),
            Self::PathPattern => filter.path_pattern.is_some(),
        }
    }

    fn predicate(self) -> &'static str {
        match self {
            Self::Repository => "o.repository = json_extract(q.v, '$.repository')",
            Self::Analysis => "o.analysis_id = json_extract(q.v, '$.analysis')",
            Self::Commit => "o.commit_id = json_extract(q.v, '$.commit')",
            Self::Lifespan => "o.lifespan_id = json_extract(q.v, '$.lifespan')",
            Self::Kind => "o.kind = json_extract(q.v, '$.kind')",
            Self::File => {
                "EXISTS (SELECT 1 FROM json_each(o.locations) loc
                         WHERE json_extract(loc.value, '$.file') = json_extract(q.v, '$.file'))"
            }
            Self::PathPattern => {
                "EXISTS (SELECT 1 FROM json_each(o.locations) loc
                         WHERE path_glob(json_extract(q.v, '$.pathPattern'),
                                         json_extract(loc.value, '$.file')))"
            }
        }
    }
}

/// The set of occurrence filters a request uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OccurrenceShape(u8);

impl OccurrenceShape {
    pub fn of(filter: &OccurrenceFilter) -> Self {
        Self(
            OccurrenceField::ALL
                .iter()
                .filter(|f| f.is_set(filter))
                .fold(0, |bits, f| bits | f.bit()),
        )
    }

    pub fn contains(self, field: OccurrenceField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn fields(self) -> impl Iterator<Item = OccurrenceField> {
        OccurrenceField::ALL
            .into_iter()
            .filter(move |f| self.contains(*f))
    }

    /// Chain-scoped pages walk the chain; everything else is ordered by id.
    pub fn sort_key(self) -> SortKey {
        if self.contains(OccurrenceField::Lifespan) {
            SortKey::BY_CHAIN_POSITION
        } else {
            SortKey::BY_ID
        }
    }

    /// One statement answering every input of this shape.
    ///
    /// `?1` is a JSON array of objects carrying the filter values, an optional
    /// `after` array (inclusive lower bound in sort-key order) and an optional
    /// `lim`. Each input yields its rows in order, or a single all-NULL row if
    /// nothing matched.
    pub(crate) fn window_sql(self) -> String {
        let (order, after) = if self.sort_key() == SortKey::BY_CHAIN_POSITION {
            (
                "o.lifespan_id, o.ordinal",
                "(o.lifespan_id, o.ordinal) >= (json_extract(q.v, '$.after[0]'), \
                 CAST(json_extract(q.v, '$.after[1]') AS INTEGER))",
            )
        } else {
            ("o.id", "o.id >= json_extract(q.v, '$.after[0]')")
        };
        let predicates: Vec<&str> = self.fields().map(OccurrenceField::predicate).collect();
        window_statement(&WindowParts {
            table: "occurrences o",
            columns: OCCURRENCE_COLUMNS,
            order,
            after,
            predicates: &predicates,
        })
    }
}

impl fmt::Display for OccurrenceShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields().map(OccurrenceField::name).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Filterable attributes of a lifespan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifespanField {
    Repository,
    Analysis,
    Kind,
}

impl LifespanField {
    pub const ALL: [Self; 3] = [Self::Repository, Self::Analysis, Self::Kind];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Repository => "repository",
            Self::Analysis => "analysis",
            Self::Kind => "kind",
        }
    }

    fn is_set(self, filter: &LifespanFilter) -> bool {
        match self {
            Self::Repository => filter.repository.is_some(),
            Self::Analysis => filter.analysis.is_some(),
            Self::Kind => filter.kind.is_some(),
        }
    }

    fn predicate(self) -> &'static str {
        match self {
            Self::Repository => "l.repository = json_extract(q.v, '$.repository')",
            Self::Analysis => "l.analysis_id = json_extract(q.v, '$.analysis')",
            Self::Kind => "l.kind = json_extract(q.v, '$.kind')",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LifespanShape(u8);

impl LifespanShape {
    pub fn of(filter: &LifespanFilter) -> Self {
        Self(
            LifespanField::ALL
                .iter()
                .filter(|f| f.is_set(filter))
                .fold(0, |bits, f| bits | f.bit()),
        )
    }

    pub fn contains(self, field: LifespanField) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn fields(self) -> impl Iterator<Item = LifespanField> {
        LifespanField::ALL
            .into_iter()
            .filter(move |f| self.contains(*f))
    }

    pub fn sort_key(self) -> SortKey {
        SortKey::BY_ID
    }

    pub(crate) fn window_sql(self) -> String {
        let predicates: Vec<&str> = self.fields().map(LifespanField::predicate).collect();
        window_statement(&WindowParts {
            table: "lifespans l",
            columns: LIFESPAN_COLUMNS,
            order: "l.id",
            after: "l.id >= json_extract(q.v, '$.after[0]')",
            predicates: &predicates,
        })
    }
}

impl fmt::Display for LifespanShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields().map(LifespanField::name).collect();
        write!(f, "[{}]", names.join(","))
    }
}

struct WindowParts<'a> {
    table: &'a str,
    columns: &'a str,
    order: &'a str,
    after: &'a str,
    predicates: &'a [&'a str],
}

fn window_statement(parts: &WindowParts<'_>) -> String {
    let mut conditions = String::from("1 = 1");
    for predicate in parts.predicates {
        conditions.push_str("\n          AND ");
        conditions.push_str(predicate);
    }
    let result_columns = parts
        .columns
        .split(", ")
        .map(|c| format!("r.{}", c.split('.').nth(1).unwrap_or(c)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "WITH q AS (SELECT key AS idx, value AS v FROM json_each(?1)),
ranked AS (
    SELECT q.idx AS idx, {columns},
           ROW_NUMBER() OVER (PARTITION BY q.idx ORDER BY {order}) AS rn,
           json_extract(q.v, '$.lim') AS lim
    FROM q JOIN {table}
      ON {conditions}
          AND (json_extract(q.v, '$.after') IS NULL OR {after})
)
SELECT q.idx, {result_columns}
FROM q LEFT JOIN ranked r ON r.idx = q.idx AND (r.lim IS NULL OR r.rn <= r.lim)
ORDER BY q.idx, r.rn",
        columns = parts.columns,
        order = parts.order,
        table = parts.table,
        after = parts.after,
    )
}
