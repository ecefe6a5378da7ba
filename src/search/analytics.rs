//! Click-through analytics for later ranking improvements.
//!
//! Every (query, position, selected id) tuple is recorded. The ranker does
//! not consume these yet; the CTR term is reserved behind
//! `SearchConfig::rank_weights` rebalancing when it lands.

use chrono::Utc;
use rusqlite::{params, Connection};

use crate::error::Result;

/// Record that a search ran and (optionally) which result was selected.
pub fn record(
    conn: &Connection,
    query: &str,
    result_count: usize,
    selected_id: Option<&str>,
    position: Option<usize>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO search_analytics (query, result_count, selected_id, position, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            query,
            result_count as i64,
            selected_id,
            position.map(|p| p as i64),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Selection counts per memory id — the raw material for a CTR signal.
pub fn selection_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT selected_id, COUNT(*) FROM search_analytics \
         WHERE selected_id IS NOT NULL GROUP BY selected_id ORDER BY COUNT(*) DESC",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
