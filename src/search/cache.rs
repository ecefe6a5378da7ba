//! Search result cache.
//!
//! Entries key a query by a fingerprint of the normalized query text plus
//! the filter bag, hold memory ids only (results re-materialize from the
//! store on hit, so non-filter mutations show through), and expire after a
//! TTL. Writes to the store invalidate any entry whose id list intersects
//! the mutated id; creates conservatively invalidate by textual overlap.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::config::SearchConfig;
use crate::error::Result;
use crate::store::types::Scope;

/// Fingerprint of a query plus its filter bag.
pub fn fingerprint(
    query: &str,
    project: Option<&str>,
    tags: &[String],
    min_importance: Option<f64>,
    scope: Option<Scope>,
) -> String {
    let normalized = normalize_query(query);
    let mut sorted_tags: Vec<&str> = tags.iter().map(|t| t.as_str()).collect();
    sorted_tags.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(project.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(sorted_tags.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(format!("{:?}", min_importance).as_bytes());
    hasher.update(b"|");
    hasher.update(scope.map(|s| s.as_str()).unwrap_or("").as_bytes());

    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Look up a live cache entry, bumping its hit count.
pub fn lookup(conn: &Connection, fp: &str) -> Result<Option<Vec<String>>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT memory_ids, expires_at FROM search_cache WHERE fingerprint = ?1",
            params![fp],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((ids_json, expires_at)) = row else {
        return Ok(None);
    };

    let expired = expires_at
        .parse::<DateTime<Utc>>()
        .map(|t| t <= Utc::now())
        .unwrap_or(true);
    if expired {
        conn.execute("DELETE FROM search_cache WHERE fingerprint = ?1", params![fp])?;
        return Ok(None);
    }

    conn.execute(
        "UPDATE search_cache SET hit_count = hit_count + 1 WHERE fingerprint = ?1",
        params![fp],
    )?;
    Ok(Some(serde_json::from_str(&ids_json)?))
}

/// Store a result set. Sets outside the configured size band bypass the
/// cache entirely; the table is bounded by evicting expired entries first,
/// then the oldest.
pub fn store(
    conn: &Connection,
    fp: &str,
    query: &str,
    ids: &[String],
    config: &SearchConfig,
) -> Result<()> {
    if ids.len() < config.cache_min_results || ids.len() > config.cache_max_results {
        return Ok(());
    }

    let now = Utc::now();
    let expires = now + Duration::hours(config.cache_ttl_hours);
    conn.execute(
        "INSERT INTO search_cache (fingerprint, query, memory_ids, hit_count, created_at, expires_at) \
         VALUES (?1, ?2, ?3, 0, ?4, ?5) \
         ON CONFLICT(fingerprint) DO UPDATE SET \
           memory_ids = excluded.memory_ids, \
           created_at = excluded.created_at, \
           expires_at = excluded.expires_at",
        params![
            fp,
            normalize_query(query),
            serde_json::to_string(ids)?,
            now.to_rfc3339(),
            expires.to_rfc3339(),
        ],
    )?;

    evict(conn, config.cache_max_entries)?;
    Ok(())
}

/// Drop entries past their TTL, then oldest-first down to `max_entries`.
fn evict(conn: &Connection, max_entries: usize) -> Result<()> {
    conn.execute(
        "DELETE FROM search_cache WHERE expires_at <= ?1",
        params![Utc::now().to_rfc3339()],
    )?;
    conn.execute(
        "DELETE FROM search_cache WHERE fingerprint IN ( \
           SELECT fingerprint FROM search_cache \
           ORDER BY expires_at ASC \
           LIMIT max(0, (SELECT COUNT(*) FROM search_cache) - ?1))",
        params![max_entries as i64],
    )?;
    Ok(())
}

/// Drop every entry whose id list contains `id`. Conservative by design.
pub fn invalidate_for_id(conn: &Connection, id: &str) -> Result<()> {
    let needle = format!("%\"{id}\"%");
    let dropped = conn.execute(
        "DELETE FROM search_cache WHERE memory_ids LIKE ?1",
        params![needle],
    )?;
    if dropped > 0 {
        tracing::debug!(id, dropped, "invalidated cached searches");
    }
    Ok(())
}

/// On create: drop entries whose cached query shares a content word with
/// the new memory — the new memory may belong in those result sets.
pub fn invalidate_for_create(conn: &Connection, content: &str) -> Result<()> {
    let content_words = word_set(content);
    if content_words.is_empty() {
        return Ok(());
    }

    let queries: Vec<(String, String)> = {
        let mut stmt = conn.prepare("SELECT fingerprint, query FROM search_cache")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows
    };

    for (fp, query) in queries {
        if word_set(&query).iter().any(|w| content_words.contains(w)) {
            conn.execute("DELETE FROM search_cache WHERE fingerprint = ?1", params![fp])?;
        }
    }
    Ok(())
}

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("m-{i}")).collect()
    }

    #[test]
    fn fingerprint_normalizes_query_and_tags() {
        let a = fingerprint("  Hello   World ", Some("p1"), &["b".into(), "a".into()], None, None);
        let b = fingerprint("hello world", Some("p1"), &["a".into(), "b".into()], None, None);
        assert_eq!(a, b);

        let c = fingerprint("hello world", Some("p2"), &[], None, None);
        assert_ne!(a, c);
        let d = fingerprint("hello world", Some("p1"), &[], Some(0.5), None);
        assert_ne!(b, d);
    }

    #[test]
    fn store_and_lookup_round_trip() {
        let conn = db::open_memory_intelligence_db();
        let config = SearchConfig::default();
        let fp = fingerprint("auth", None, &[], None, None);

        store(&conn, &fp, "auth", &ids(5), &config).unwrap();
        let hit = lookup(&conn, &fp).unwrap().unwrap();
        assert_eq!(hit, ids(5));

        // Hit count bumped
        let count: i64 = conn
            .query_row(
                "SELECT hit_count FROM search_cache WHERE fingerprint = ?1",
                params![fp],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn size_band_gates_caching() {
        let conn = db::open_memory_intelligence_db();
        let config = SearchConfig::default();

        store(&conn, "fp-small", "q", &ids(2), &config).unwrap();
        assert!(lookup(&conn, "fp-small").unwrap().is_none());

        store(&conn, "fp-big", "q", &ids(101), &config).unwrap();
        assert!(lookup(&conn, "fp-big").unwrap().is_none());

        store(&conn, "fp-ok", "q", &ids(3), &config).unwrap();
        assert!(lookup(&conn, "fp-ok").unwrap().is_some());
    }

    #[test]
    fn expired_entries_are_dropped_on_lookup() {
        let conn = db::open_memory_intelligence_db();
        let mut config = SearchConfig::default();
        config.cache_ttl_hours = 0; // expires immediately

        let fp = fingerprint("stale", None, &[], None, None);
        store(&conn, &fp, "stale", &ids(5), &config).unwrap();
        assert!(lookup(&conn, &fp).unwrap().is_none());
    }

    #[test]
    fn invalidate_by_id_drops_containing_entries() {
        let conn = db::open_memory_intelligence_db();
        let config = SearchConfig::default();
        store(&conn, "fp-1", "queue", &ids(4), &config).unwrap();
        store(&conn, "fp-2", "other", &["x-1".into(), "x-2".into(), "x-3".into()], &config).unwrap();

        invalidate_for_id(&conn, "m-2").unwrap();
        assert!(lookup(&conn, "fp-1").unwrap().is_none());
        assert!(lookup(&conn, "fp-2").unwrap().is_some());
    }

    #[test]
    fn invalidate_on_create_by_textual_overlap() {
        let conn = db::open_memory_intelligence_db();
        let config = SearchConfig::default();
        store(&conn, "fp-auth", "authentication tokens", &ids(4), &config).unwrap();
        store(&conn, "fp-deploy", "deploy pipeline", &ids(4), &config).unwrap();

        invalidate_for_create(&conn, "New fact about authentication headers").unwrap();
        assert!(lookup(&conn, "fp-auth").unwrap().is_none());
        assert!(lookup(&conn, "fp-deploy").unwrap().is_some());
    }

    #[test]
    fn eviction_bounds_entry_count() {
        let conn = db::open_memory_intelligence_db();
        let mut config = SearchConfig::default();
        config.cache_max_entries = 3;

        for i in 0..6 {
            store(&conn, &format!("fp-{i}"), &format!("query {i}"), &ids(5), &config).unwrap();
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM search_cache", [], |r| r.get(0))
            .unwrap();
        assert!(count <= 3);
    }
}
