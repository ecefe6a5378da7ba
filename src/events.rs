//! Notification channel — an append-only `events` table that external
//! consumers (dashboard, notifier) drain. Emission never fails the calling
//! operation; a dropped notification is logged and tolerated.

use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::warn;

/// Append an event. `payload` is free-form JSON for the consumer.
pub fn emit(conn: &Connection, kind: &str, memory_id: Option<&str>, payload: serde_json::Value) {
    let result = conn.execute(
        "INSERT INTO events (kind, memory_id, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![kind, memory_id, payload.to_string(), Utc::now().to_rfc3339()],
    );
    if let Err(e) = result {
        warn!(kind, error = %e, "failed to emit event");
    }
}

/// Read the most recent events, newest first.
pub fn recent(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<(String, Option<String>, String)>> {
    let mut stmt = conn.prepare(
        "SELECT kind, memory_id, payload FROM events ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
