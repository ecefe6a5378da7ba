//! Forward-only schema migration framework.
//!
//! Each sidecar database tracks its own version in `schema_meta` and runs
//! sequential migrations up to its current target. Readers must tolerate
//! additive columns, so migrations here only ever add.

use rusqlite::Connection;

/// Which sidecar database a migration run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Database {
    Intelligence,
    Session,
    Fsrs,
}

impl Database {
    /// The schema version the current binary expects for this database.
    pub fn current_version(&self) -> u32 {
        match self {
            Self::Intelligence => 1,
            Self::Session => 1,
            Self::Fsrs => 2,
        }
    }
}

/// Get the stored schema version.
pub fn get_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().unwrap_or(0))
        },
    )
}

fn set_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Run any pending forward-only migrations for `db`.
pub fn run(conn: &Connection, db: Database) -> rusqlite::Result<()> {
    let target = db.current_version();
    let mut version = get_version(conn)?;

    while version < target {
        let next = version + 1;
        tracing::info!(?db, from = version, to = next, "running migration");

        match (db, next) {
            (Database::Fsrs, 2) => migrate_fsrs_v1_to_v2(conn)?,
            _ => {
                tracing::error!(?db, version = next, "unknown migration target");
                break;
            }
        }

        set_version(conn, next)?;
        version = next;
    }

    Ok(())
}

/// FSRS v1 → v2: cross-project promotion needs the per-memory set of
/// projects that validated the memory.
fn migrate_fsrs_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    let has_column: bool = conn
        .prepare("SELECT 1 FROM pragma_table_info('fsrs_state') WHERE name = 'validated_projects'")?
        .exists([])?;
    if !has_column {
        conn.execute(
            "ALTER TABLE fsrs_state ADD COLUMN validated_projects TEXT NOT NULL DEFAULT '[]'",
            [],
        )?;
    }
    Ok(())
}
