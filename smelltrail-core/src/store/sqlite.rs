use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex, MutexGuard};

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{IntegrityViolation, StoreError, TrailError};
use crate::types::{
    Analysis, ChainPosition, ChainRows, CodeSmellBatch, InsertReport, Lifespan, LifespanFilter,
    NewCodeSmell, Occurrence, OccurrenceFilter, PATH_MATCH, StoreStats,
};

use super::schema::{self, LIFESPAN_COLUMNS, OCCURRENCE_COLUMNS};
use super::shape::{LifespanShape, OccurrenceShape};
use super::traits::{RelationalStore, WindowQuery};

static OCCURRENCES_BY_ID: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT q.key, {OCCURRENCE_COLUMNS}
         FROM json_each(?1) q LEFT JOIN occurrences o ON o.id = q.value
         ORDER BY q.key"
    )
});

static OCCURRENCES_BY_POSITION: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT q.key, {OCCURRENCE_COLUMNS}
         FROM json_each(?1) q LEFT JOIN occurrences o
           ON o.lifespan_id = json_extract(q.value, '$[0]')
          AND o.ordinal = json_extract(q.value, '$[1]')
         ORDER BY q.key"
    )
});

static LIFESPANS_BY_ID: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT q.key, {LIFESPAN_COLUMNS}
         FROM json_each(?1) q LEFT JOIN lifespans l ON l.id = q.value
         ORDER BY q.key"
    )
});

/// Walk each chain from ordinal 0 through `ordinal + 1` links.
static CHAINS: LazyLock<String> = LazyLock::new(|| {
    format!(
        "WITH RECURSIVE q AS (SELECT key AS idx, value AS lid FROM json_each(?1)),
         chain AS (
             SELECT q.idx AS idx, {OCCURRENCE_COLUMNS}
             FROM q JOIN occurrences o ON o.lifespan_id = q.lid AND o.ordinal = 0
             UNION ALL
             SELECT c.idx, {OCCURRENCE_COLUMNS}
             FROM chain c JOIN occurrences o
               ON o.lifespan_id = c.lifespan_id AND o.ordinal = c.ordinal + 1
         )
         SELECT o.idx, {OCCURRENCE_COLUMNS} FROM chain o ORDER BY o.idx, o.ordinal"
    )
});

const CHAIN_TOTALS: &str = "SELECT q.key,
        EXISTS (SELECT 1 FROM lifespans l WHERE l.id = q.value),
        (SELECT COUNT(*) FROM occurrences o WHERE o.lifespan_id = q.value)
     FROM json_each(?1) q ORDER BY q.key";

const ANALYSES_BY_ID: &str = "SELECT q.key, a.id, a.name
     FROM json_each(?1) q LEFT JOIN analyses a ON a.id = q.value ORDER BY q.key";

const ANALYSES_BY_NAME: &str = "SELECT q.key, a.id, a.name
     FROM json_each(?1) q LEFT JOIN analyses a ON a.name = q.value ORDER BY q.key";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// `path_glob(pattern, path)`: the `glob` crate's matcher, so patterns mean
/// the same thing in SQL as where they are validated. SQLite's own `GLOB`
/// has no `**` and no `[!...]`.
fn register_path_glob(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "path_glob",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern = ctx.get_or_create_aux(0, |v| -> Result<glob::Pattern, BoxError> {
                Ok(glob::Pattern::new(v.as_str()?)?)
            })?;
            let path: Option<String> = ctx.get(1)?;
            Ok(path.is_some_and(|p| pattern.matches_with(&p, PATH_MATCH)))
        },
    )
}

/// SQLite-backed implementation of [`RelationalStore`].
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("smelltrail store mutex poisoned")
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        // Ignored for in-memory databases
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        register_path_glob(&conn).map_err(StoreError::Sqlite)?;

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        let version: Option<String> = conn
            .query_row(
                "SELECT value FROM smelltrail_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        match version.as_deref() {
            None => {
                conn.execute(
                    "INSERT INTO smelltrail_meta (key, value) VALUES ('schema_version', ?1)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(StoreError::Sqlite)?;
            }
            Some(schema::SCHEMA_VERSION) => {}
            Some(other) => {
                return Err(StoreError::Migration(format!(
                    "database schema version {other} is not supported (expected {})",
                    schema::SCHEMA_VERSION
                ))
                .into());
            }
        }
        Ok(())
    }
}

// ── Row mapping ────────────────────────────────────────────────────

/// Occurrence columns starting at `base`; `None` for a LEFT JOIN miss.
fn occurrence_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Option<Occurrence>> {
    let Some(id) = row.get::<_, Option<String>>(base)? else {
        return Ok(None);
    };
    let locations_json: String = row.get(base + 5)?;
    let locations = serde_json::from_str(&locations_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(base + 5, Type::Text, Box::new(e)))?;
    Ok(Some(Occurrence {
        id,
        lifespan_id: row.get(base + 1)?,
        ordinal: row.get(base + 2)?,
        kind: row.get(base + 3)?,
        message: row.get(base + 4)?,
        locations,
        commit_id: row.get(base + 6)?,
        repository: row.get(base + 7)?,
        analysis_id: row.get(base + 8)?,
    }))
}

fn lifespan_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Option<Lifespan>> {
    let Some(id) = row.get::<_, Option<String>>(base)? else {
        return Ok(None);
    };
    Ok(Some(Lifespan {
        id,
        kind: row.get(base + 1)?,
        repository: row.get(base + 2)?,
        analysis_id: row.get(base + 3)?,
    }))
}

fn analysis_from_row(row: &Row<'_>, base: usize) -> rusqlite::Result<Option<Analysis>> {
    let Some(id) = row.get::<_, Option<String>>(base)? else {
        return Ok(None);
    };
    Ok(Some(Analysis {
        id,
        name: row.get(base + 1)?,
    }))
}

/// Run a bulk lookup keyed by input index; one entry per input.
fn keyed<T>(
    conn: &Connection,
    sql: &str,
    input: &str,
    len: usize,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<Option<T>>,
) -> rusqlite::Result<Vec<Option<T>>> {
    let mut out: Vec<Option<T>> = std::iter::repeat_with(|| None).take(len).collect();
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params![input])?;
    while let Some(row) = rows.next()? {
        let idx: usize = row.get(0)?;
        if let Some(slot) = out.get_mut(idx) {
            *slot = map(row)?;
        }
    }
    Ok(out)
}

/// Run a bulk window query; rows are grouped per input index in order.
fn grouped<T>(
    conn: &Connection,
    sql: &str,
    input: &str,
    len: usize,
    map: impl Fn(&Row<'_>) -> rusqlite::Result<Option<T>>,
) -> rusqlite::Result<Vec<Vec<Option<T>>>> {
    let mut out: Vec<Vec<Option<T>>> = std::iter::repeat_with(Vec::new).take(len).collect();
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params![input])?;
    while let Some(row) = rows.next()? {
        let idx: usize = row.get(0)?;
        if let Some(window) = out.get_mut(idx) {
            window.push(map(row)?);
        }
    }
    Ok(out)
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> crate::error::Result<String> {
    serde_json::to_string(value)
        .map_err(StoreError::Serialization)
        .map_err(TrailError::Store)
}

fn check_lifespan(
    existing: &Lifespan,
    smell: &NewCodeSmell,
    repository: &str,
    analysis_id: &str,
) -> Result<(), IntegrityViolation> {
    let claims = [
        ("kind", existing.kind.as_str(), smell.kind.as_str()),
        ("repository", existing.repository.as_str(), repository),
        ("analysis", existing.analysis_id.as_str(), analysis_id),
    ];
    for (field, existing_value, claimed) in claims {
        if existing_value != claimed {
            return Err(IntegrityViolation::LifespanConflict {
                lifespan: existing.id.clone(),
                field,
                existing: existing_value.to_string(),
                claimed: claimed.to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl RelationalStore for SqliteStore {
    // ── Point lookups ──────────────────────────────────────────────

    async fn occurrences_by_id(
        &self,
        ids: &[String],
    ) -> crate::error::Result<Vec<Option<Occurrence>>> {
        let input = to_json(ids)?;
        let conn = self.lock();
        Ok(
            keyed(&conn, &OCCURRENCES_BY_ID, &input, ids.len(), |row| {
                occurrence_from_row(row, 1)
            })
            .map_err(StoreError::Sqlite)?,
        )
    }

    async fn occurrences_by_position(
        &self,
        positions: &[ChainPosition],
    ) -> crate::error::Result<Vec<Option<Occurrence>>> {
        let pairs: Vec<(&str, u32)> = positions
            .iter()
            .map(|p| (p.lifespan_id.as_str(), p.ordinal))
            .collect();
        let input = to_json(&pairs)?;
        let conn = self.lock();
        Ok(
            keyed(&conn, &OCCURRENCES_BY_POSITION, &input, positions.len(), |row| {
                occurrence_from_row(row, 1)
            })
            .map_err(StoreError::Sqlite)?,
        )
    }

    async fn lifespans_by_id(&self, ids: &[String]) -> crate::error::Result<Vec<Option<Lifespan>>> {
        let input = to_json(ids)?;
        let conn = self.lock();
        Ok(
            keyed(&conn, &LIFESPANS_BY_ID, &input, ids.len(), |row| {
                lifespan_from_row(row, 1)
            })
            .map_err(StoreError::Sqlite)?,
        )
    }

    async fn analyses_by_id(&self, ids: &[String]) -> crate::error::Result<Vec<Option<Analysis>>> {
        let input = to_json(ids)?;
        let conn = self.lock();
        Ok(
            keyed(&conn, ANALYSES_BY_ID, &input, ids.len(), |row| {
                analysis_from_row(row, 1)
            })
            .map_err(StoreError::Sqlite)?,
        )
    }

    async fn analyses_by_name(
        &self,
        names: &[String],
    ) -> crate::error::Result<Vec<Option<Analysis>>> {
        let input = to_json(names)?;
        let conn = self.lock();
        Ok(
            keyed(&conn, ANALYSES_BY_NAME, &input, names.len(), |row| {
                analysis_from_row(row, 1)
            })
            .map_err(StoreError::Sqlite)?,
        )
    }

    // ── Windows ────────────────────────────────────────────────────

    async fn occurrence_windows(
        &self,
        shape: OccurrenceShape,
        queries: &[WindowQuery<OccurrenceFilter>],
    ) -> crate::error::Result<Vec<Vec<Option<Occurrence>>>> {
        let mut inputs = Vec::with_capacity(queries.len());
        for query in queries {
            if OccurrenceShape::of(&query.filter) != shape {
                return Err(TrailError::InvalidInput(format!(
                    "occurrence query does not have shape {shape}"
                )));
            }
            let f = &query.filter;
            inputs.push(json!({
                "repository": f.repository,
                "analysis": f.analysis,
                "commit": f.commit,
                "lifespan": f.lifespan,
                "kind": f.kind,
                "file": f.file,
                "pathPattern": f.path_pattern,
                "after": query.after,
                "lim": query.limit,
            }));
        }
        let input = to_json(&inputs)?;
        let sql = shape.window_sql();

        let conn = self.lock();
        let windows = grouped(&conn, &sql, &input, queries.len(), |row| {
            occurrence_from_row(row, 1)
        })
        .map_err(StoreError::Sqlite)?;
        debug!(shape = %shape, inputs = queries.len(), "occurrence windows fetched");
        Ok(windows)
    }

    async fn lifespan_windows(
        &self,
        shape: LifespanShape,
        queries: &[WindowQuery<LifespanFilter>],
    ) -> crate::error::Result<Vec<Vec<Option<Lifespan>>>> {
        let mut inputs = Vec::with_capacity(queries.len());
        for query in queries {
            if LifespanShape::of(&query.filter) != shape {
                return Err(TrailError::InvalidInput(format!(
                    "lifespan query does not have shape {shape}"
                )));
            }
            let f = &query.filter;
            inputs.push(json!({
                "repository": f.repository,
                "analysis": f.analysis,
                "kind": f.kind,
                "after": query.after,
                "lim": query.limit,
            }));
        }
        let input = to_json(&inputs)?;
        let sql = shape.window_sql();

        let conn = self.lock();
        let windows = grouped(&conn, &sql, &input, queries.len(), |row| {
            lifespan_from_row(row, 1)
        })
        .map_err(StoreError::Sqlite)?;
        debug!(shape = %shape, inputs = queries.len(), "lifespan windows fetched");
        Ok(windows)
    }

    async fn lifespan_chains(&self, ids: &[String]) -> crate::error::Result<Vec<Option<ChainRows>>> {
        let input = to_json(ids)?;
        let conn = self.lock();

        let mut chains = keyed(&conn, CHAIN_TOTALS, &input, ids.len(), |row| {
            let exists: bool = row.get(1)?;
            let total: usize = row.get(2)?;
            Ok(exists.then(|| ChainRows {
                reachable: Vec::new(),
                total,
            }))
        })
        .map_err(StoreError::Sqlite)?;

        let steps = grouped(&conn, &CHAINS, &input, ids.len(), |row| {
            occurrence_from_row(row, 1)
        })
        .map_err(StoreError::Sqlite)?;

        for (chain, rows) in chains.iter_mut().zip(steps) {
            if let Some(chain) = chain {
                chain.reachable = rows.into_iter().flatten().collect();
            }
        }
        Ok(chains)
    }

    // ── Mutations ──────────────────────────────────────────────────

    async fn insert_code_smells(
        &self,
        batch: &CodeSmellBatch,
    ) -> crate::error::Result<InsertReport> {
        let conn = self.lock();
        // Dropping `tx` on any early return rolls the whole batch back.
        let tx = conn.unchecked_transaction().map_err(StoreError::Sqlite)?;

        let existing_analysis: Option<String> = tx
            .query_row(
                "SELECT id FROM analyses WHERE name = ?1",
                params![batch.analysis_name],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        let analysis_id = if let Some(id) = existing_analysis {
            id
        } else {
            let id = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO analyses (id, name) VALUES (?1, ?2)",
                params![id, batch.analysis_name],
            )
            .map_err(StoreError::Sqlite)?;
            id
        };

        let mut report = InsertReport {
            analysis_id: analysis_id.clone(),
            ..InsertReport::default()
        };

        for smell in &batch.smells {
            let created = tx
                .execute(
                    "INSERT INTO lifespans (id, kind, repository, analysis_id)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO NOTHING",
                    params![smell.lifespan_id, smell.kind, batch.repository, analysis_id],
                )
                .map_err(StoreError::Sqlite)?;

            if created == 0 {
                let existing = tx
                    .query_row(
                        &format!("SELECT {LIFESPAN_COLUMNS} FROM lifespans l WHERE l.id = ?1"),
                        params![smell.lifespan_id],
                        |row| lifespan_from_row(row, 0),
                    )
                    .map_err(StoreError::Sqlite)?;
                if let Some(existing) = existing {
                    check_lifespan(&existing, smell, &batch.repository, &analysis_id)?;
                }
            } else {
                report.lifespans_created += 1;
            }

            let count: u32 = tx
                .query_row(
                    "SELECT COUNT(*) FROM occurrences WHERE lifespan_id = ?1",
                    params![smell.lifespan_id],
                    |row| row.get(0),
                )
                .map_err(StoreError::Sqlite)?;
            if smell.ordinal != count {
                return Err(IntegrityViolation::NonContiguousAppend {
                    lifespan: smell.lifespan_id.clone(),
                    count,
                    ordinal: smell.ordinal,
                }
                .into());
            }

            let id = smell
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let locations = to_json(&smell.locations)?;
            tx.execute(
                "INSERT INTO occurrences
                    (id, lifespan_id, ordinal, kind, message, locations, repository, commit_id, analysis_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    smell.lifespan_id,
                    smell.ordinal,
                    smell.kind,
                    smell.message,
                    locations,
                    batch.repository,
                    batch.commit_id,
                    analysis_id,
                ],
            )
            .map_err(StoreError::Sqlite)?;
            report.occurrence_ids.push(id);
        }

        tx.commit().map_err(StoreError::Sqlite)?;
        info!(
            repository = %batch.repository,
            commit = %batch.commit_id,
            analysis = %batch.analysis_name,
            occurrences = report.occurrence_ids.len(),
            lifespans_created = report.lifespans_created,
            "code smells inserted"
        );
        Ok(report)
    }

    async fn delete_lifespan(&self, id: &str) -> crate::error::Result<bool> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM lifespans WHERE id = ?1", params![id])
            .map_err(StoreError::Sqlite)?;
        Ok(removed > 0)
    }

    async fn delete_analysis(&self, id: &str) -> crate::error::Result<bool> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM analyses WHERE id = ?1", params![id])
            .map_err(StoreError::Sqlite)?;
        Ok(removed > 0)
    }

    async fn delete_repository(&self, name: &str) -> crate::error::Result<u64> {
        let conn = self.lock();
        let removed = conn
            .execute("DELETE FROM lifespans WHERE repository = ?1", params![name])
            .map_err(StoreError::Sqlite)?;
        Ok(removed as u64)
    }

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self) -> crate::error::Result<StoreStats> {
        let conn = self.lock();

        let analyses: u64 = conn
            .query_row("SELECT COUNT(*) FROM analyses", [], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        let lifespans: u64 = conn
            .query_row("SELECT COUNT(*) FROM lifespans", [], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        let occurrences: u64 = conn
            .query_row("SELECT COUNT(*) FROM occurrences", [], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;

        let mut stmt = conn
            .prepare("SELECT kind, COUNT(*) FROM occurrences GROUP BY kind")
            .map_err(StoreError::Sqlite)?;
        let occurrences_by_kind: HashMap<String, u64> = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<HashMap<_, _>>>()
            .map_err(StoreError::Sqlite)?;

        let mut stmt = conn
            .prepare("SELECT DISTINCT repository FROM lifespans ORDER BY repository")
            .map_err(StoreError::Sqlite)?;
        let repositories = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(StoreError::Sqlite)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        let db_size_bytes = self
            .db_path
            .as_ref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map_or(0, |m| m.len());

        Ok(StoreStats {
            analyses,
            lifespans,
            occurrences,
            occurrences_by_kind,
            repositories,
            db_size_bytes,
        })
    }
}
