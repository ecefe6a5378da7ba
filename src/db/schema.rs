//! SQL DDL for the three sidecar databases.
//!
//! All DDL uses `IF NOT EXISTS` for idempotent initialization. The derived
//! `memory_index` mirrors markdown frontmatter and can always be rebuilt
//! from the files; the queue, history, and graph tables are authoritative.

use rusqlite::Connection;

/// Intelligence database: derived index, FTS5, vectors, graph, cache,
/// breaker state, events.
const INTELLIGENCE_SQL: &str = r#"
-- Derived mirror of markdown frontmatter (rebuildable from the files)
CREATE TABLE IF NOT EXISTS memory_index (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    project TEXT NOT NULL,
    scope TEXT NOT NULL CHECK(scope IN ('project','global')),
    tags TEXT NOT NULL DEFAULT '[]',
    importance REAL NOT NULL CHECK(importance >= 0.0 AND importance <= 1.0),
    created TEXT NOT NULL,
    last_reinforced TEXT NOT NULL,
    reinforcement_count INTEGER NOT NULL DEFAULT 1,
    source_session TEXT NOT NULL DEFAULT 'unknown',
    archived INTEGER NOT NULL DEFAULT 0,
    content_hash TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_index_project ON memory_index(project);
CREATE INDEX IF NOT EXISTS idx_index_scope ON memory_index(scope);
CREATE INDEX IF NOT EXISTS idx_index_archived ON memory_index(archived);
CREATE INDEX IF NOT EXISTS idx_index_importance ON memory_index(importance);

-- Embedding sidecar cache keyed by content hash (warm restarts, fallback search)
CREATE TABLE IF NOT EXISTS embedding_cache (
    content_hash TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Typed relationship graph
CREATE TABLE IF NOT EXISTS memory_relationships (
    id TEXT PRIMARY KEY,
    from_memory_id TEXT NOT NULL,
    to_memory_id TEXT NOT NULL,
    relationship_type TEXT NOT NULL
        CHECK(relationship_type IN ('causal','contradicts','supports','requires','related')),
    strength REAL NOT NULL DEFAULT 0.5 CHECK(strength >= 0.0 AND strength <= 1.0),
    evidence TEXT,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL DEFAULT 'manual',
    UNIQUE(from_memory_id, to_memory_id, relationship_type)
);

CREATE INDEX IF NOT EXISTS idx_rel_from ON memory_relationships(from_memory_id);
CREATE INDEX IF NOT EXISTS idx_rel_to ON memory_relationships(to_memory_id);
CREATE INDEX IF NOT EXISTS idx_rel_type ON memory_relationships(relationship_type);

-- Search result cache (ids only; results re-materialize from the store)
CREATE TABLE IF NOT EXISTS search_cache (
    fingerprint TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    memory_ids TEXT NOT NULL,
    hit_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cache_expires ON search_cache(expires_at);

-- Durable circuit-breaker state per named call site
CREATE TABLE IF NOT EXISTS breaker_state (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL CHECK(state IN ('CLOSED','OPEN','HALF_OPEN')),
    failure_count INTEGER NOT NULL DEFAULT 0,
    last_failure_at TEXT,
    opened_at TEXT
);

-- Notification channel drained by external consumers
CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    memory_id TEXT,
    payload TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Keyword index over non-archived content. A plain FTS5 table (not
/// external-content) so rows can be replaced by id during sync.
const INTELLIGENCE_FTS_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    content,
    id UNINDEXED
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
const INTELLIGENCE_VEC_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS memory_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[384]
);
"#;

/// Session database: ingestion queue + search analytics.
const SESSION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_queue (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    transcript_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued'
        CHECK(status IN ('queued','running','done','failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    enqueued_at TEXT NOT NULL,
    started_at TEXT,
    acked_at TEXT,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON ingest_queue(status, enqueued_at);

CREATE TABLE IF NOT EXISTS search_analytics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    result_count INTEGER NOT NULL,
    selected_id TEXT,
    position INTEGER,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// FSRS database: scheduler state + append-only review history.
const FSRS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS fsrs_state (
    memory_id TEXT PRIMARY KEY,
    difficulty REAL NOT NULL CHECK(difficulty >= 1.0 AND difficulty <= 10.0),
    stability REAL NOT NULL CHECK(stability > 0.0),
    last_reviewed TEXT NOT NULL,
    next_due TEXT NOT NULL,
    review_count INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_fsrs_due ON fsrs_state(next_due);

CREATE TABLE IF NOT EXISTS review_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL,
    reviewed_at TEXT NOT NULL,
    grade TEXT NOT NULL CHECK(grade IN ('FAIL','HARD','GOOD','EASY')),
    stability_before REAL NOT NULL,
    stability_after REAL NOT NULL,
    difficulty_before REAL NOT NULL,
    difficulty_after REAL NOT NULL,
    prev_interval_days INTEGER NOT NULL,
    new_interval_days INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_history_memory ON review_history(memory_id, reviewed_at);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn set_initial_version(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;
    Ok(())
}

/// Initialize the intelligence schema. Idempotent.
pub fn init_intelligence_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(INTELLIGENCE_SQL)?;
    conn.execute_batch(INTELLIGENCE_FTS_SQL)?;
    // vec0 is unavailable when the extension failed to load; search falls
    // back to brute force over embedding_cache, so this is non-fatal.
    if let Err(e) = conn.execute_batch(INTELLIGENCE_VEC_SQL) {
        tracing::warn!(error = %e, "vec0 table unavailable, vector search will use brute force");
    }
    set_initial_version(conn)
}

/// Initialize the session schema. Idempotent.
pub fn init_session_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SESSION_SQL)?;
    set_initial_version(conn)
}

/// Initialize the FSRS schema. Idempotent.
pub fn init_fsrs_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(FSRS_SQL)?;
    set_initial_version(conn)
}
