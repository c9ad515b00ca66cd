/// Current schema version.
pub const SCHEMA_VERSION: &str = "1";

/// Full SQL schema for the smelltrail `SQLite` database.
pub const SCHEMA_SQL: &str = r"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS smelltrail_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Analyzer runs, addressed by id or unique name
CREATE TABLE IF NOT EXISTS analyses (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

-- One row per recurring code smell
CREATE TABLE IF NOT EXISTS lifespans (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    repository TEXT NOT NULL,
    analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_lifespans_repository ON lifespans(repository);
CREATE INDEX IF NOT EXISTS idx_lifespans_analysis ON lifespans(analysis_id);
CREATE INDEX IF NOT EXISTS idx_lifespans_kind ON lifespans(kind);

-- Detections; repository/analysis/commit are denormalized for filtering
CREATE TABLE IF NOT EXISTS occurrences (
    id TEXT PRIMARY KEY,
    lifespan_id TEXT NOT NULL REFERENCES lifespans(id) ON DELETE CASCADE,
    ordinal INTEGER NOT NULL CHECK (ordinal >= 0),
    kind TEXT NOT NULL,
    message TEXT,
    locations TEXT NOT NULL DEFAULT '[]',
    repository TEXT NOT NULL,
    commit_id TEXT NOT NULL,
    analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
    UNIQUE(lifespan_id, ordinal)
);
CREATE INDEX IF NOT EXISTS idx_occurrences_commit ON occurrences(repository, commit_id);
CREATE INDEX IF NOT EXISTS idx_occurrences_analysis ON occurrences(analysis_id);
CREATE INDEX IF NOT EXISTS idx_occurrences_kind ON occurrences(kind);
";

/// Column list shared by every occurrence query, in `occurrence_from_row` order.
pub(crate) const OCCURRENCE_COLUMNS: &str =
    "o.id, o.lifespan_id, o.ordinal, o.kind, o.message, o.locations, o.commit_id, o.repository, o.analysis_id";

/// Column list shared by every lifespan query, in `lifespan_from_row` order.
pub(crate) const LIFESPAN_COLUMNS: &str = "l.id, l.kind, l.repository, l.analysis_id";
