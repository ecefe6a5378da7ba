//! BM25 keyword channel over the FTS5 index.
//!
//! FTS5's `rank` is negative (more negative = better), so scores are
//! negated before min-max normalization across the candidate set. Only
//! non-archived memories are ever in `memory_fts`.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::error::Result;

/// Raw keyword hits: (memory id, positive BM25 score — higher is better).
pub fn keyword_search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<(String, f64)>> {
    let escaped = escape_fts_query(query);
    if escaped.is_empty() {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT id, rank FROM memory_fts WHERE memory_fts MATCH ?1 ORDER BY rank LIMIT ?2",
    )?;
    let hits = stmt
        .query_map(params![escaped, limit as i64], |row| {
            let id: String = row.get(0)?;
            let rank: f64 = row.get(1)?;
            Ok((id, -rank))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hits)
}

/// Escape a user query for FTS5 MATCH syntax: each whitespace-delimited
/// word is quoted and joined with OR, so partial matches still surface as
/// candidates (BM25 ranks multi-term hits higher anyway).
pub fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let clean = word.replace('"', "");
            format!("\"{clean}\"")
        })
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Min-max normalize raw scores into `[0, 1]`. A degenerate range (single
/// candidate or equal scores) maps everything to 1.0.
pub fn min_max_normalize(hits: &[(String, f64)]) -> HashMap<String, f64> {
    if hits.is_empty() {
        return HashMap::new();
    }
    let min = hits.iter().map(|(_, s)| *s).fold(f64::INFINITY, f64::min);
    let max = hits.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;

    hits.iter()
        .map(|(id, score)| {
            let norm = if range > f64::EPSILON {
                (score - min) / range
            } else {
                1.0
            };
            (id.clone(), norm)
        })
        .collect()
}
