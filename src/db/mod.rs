//! Sidecar database management.
//!
//! Three SQLite databases derive from the markdown tree and the append-only
//! histories: `session.db` (ingestion queue, search analytics), `fsrs.db`
//! (spaced-repetition state, review history), and `intelligence.db`
//! (derived memory index, FTS5, vectors, relationships, cache, breakers,
//! events). Readers tolerate additive columns; migrations are forward-only.

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;

use crate::error::{EngramError, Result};

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn open_raw(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path).map_err(|e| {
        EngramError::DependencyFailed(format!("cannot open {}: {e}", path.display()))
    })?;

    // WAL arbitrates the hook, CLI, and worker sharing a database file.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "busy_timeout", "5000")?;
    Ok(conn)
}

/// Open the intelligence database (index, vectors, graph, cache, breakers).
pub fn open_intelligence_db(path: impl AsRef<Path>) -> Result<Connection> {
    load_sqlite_vec();
    let conn = open_raw(&path)?;
    schema::init_intelligence_schema(&conn)?;
    migrations::run(&conn, migrations::Database::Intelligence)?;
    verify_integrity(&conn, path.as_ref())?;
    tracing::debug!(path = %path.as_ref().display(), "intelligence db ready");
    Ok(conn)
}

/// Open the session database (ingestion queue, search analytics).
pub fn open_session_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = open_raw(&path)?;
    schema::init_session_schema(&conn)?;
    migrations::run(&conn, migrations::Database::Session)?;
    Ok(conn)
}

/// Open the FSRS database (scheduler state, review history).
pub fn open_fsrs_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = open_raw(&path)?;
    schema::init_fsrs_schema(&conn)?;
    migrations::run(&conn, migrations::Database::Fsrs)?;
    Ok(conn)
}

fn verify_integrity(conn: &Connection, path: &Path) -> Result<()> {
    let integrity: String = conn.pragma_query_value(None, "quick_check", |row| row.get(0))?;
    if integrity != "ok" {
        return Err(EngramError::DependencyFailed(format!(
            "integrity check failed for {}: {integrity}",
            path.display()
        )));
    }
    Ok(())
}

/// Open an in-memory intelligence database for testing.
#[cfg(test)]
pub fn open_memory_intelligence_db() -> Connection {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    schema::init_intelligence_schema(&conn).unwrap();
    migrations::run(&conn, migrations::Database::Intelligence).unwrap();
    conn
}

#[cfg(test)]
pub fn open_memory_session_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    schema::init_session_schema(&conn).unwrap();
    migrations::run(&conn, migrations::Database::Session).unwrap();
    conn
}

#[cfg(test)]
pub fn open_memory_fsrs_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    schema::init_fsrs_schema(&conn).unwrap();
    migrations::run(&conn, migrations::Database::Fsrs).unwrap();
    conn
}
