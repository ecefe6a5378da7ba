//! Vector index with a sidecar embedding cache.
//!
//! Embeddings are dual-written: a vec0 row keyed by memory id (the index)
//! and an `embedding_cache` row keyed by content hash (warm restarts and
//! the brute-force fallback). Queries prefer vec0 KNN; when the extension
//! or table is unavailable they degrade to brute-force cosine over the
//! cache joined to the live index.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::embedding::EMBEDDING_DIM;
use crate::error::Result;

/// A semantic search hit: memory id + cosine similarity in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub similarity: f64,
}

/// Convert an f32 embedding slice to raw little-endian bytes.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Convert raw bytes back to an f32 embedding.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("4-byte chunk")))
        .collect()
}

/// For L2-normalized vectors: `L2² = 2(1 − cos)`, so `cos = 1 − L2²/2`.
fn l2_distance_to_cosine(distance: f64) -> f64 {
    1.0 - (distance * distance) / 2.0
}

/// Write an embedding to both the vec0 index and the content-hash cache.
pub fn upsert(
    conn: &Connection,
    memory_id: &str,
    content_hash: &str,
    embedding: &[f32],
) -> Result<()> {
    let bytes = embedding_to_bytes(embedding);

    conn.execute(
        "INSERT INTO embedding_cache (content_hash, embedding, dimension, created_at) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(content_hash) DO UPDATE SET embedding = excluded.embedding",
        params![content_hash, bytes, embedding.len() as i64, Utc::now().to_rfc3339()],
    )?;

    // vec0 has no upsert; replace by id. Failure here is non-fatal — the
    // cache row above keeps the brute-force path correct.
    let vec_result: rusqlite::Result<()> = (|| {
        conn.execute("DELETE FROM memory_vec WHERE id = ?1", params![memory_id])?;
        conn.execute(
            "INSERT INTO memory_vec (id, embedding) VALUES (?1, ?2)",
            params![memory_id, bytes],
        )?;
        Ok(())
    })();
    if let Err(e) = vec_result {
        debug!(error = %e, id = memory_id, "vec0 write failed, cache row retained");
    }
    Ok(())
}

/// Remove a memory's row from the vec0 index. The content-hash cache row is
/// left in place — other memories may share the hash, and it is cheap.
pub fn remove(conn: &Connection, memory_id: &str) -> Result<()> {
    let _ = conn.execute("DELETE FROM memory_vec WHERE id = ?1", params![memory_id]);
    Ok(())
}

/// Look up a cached embedding by content hash.
pub fn cached(conn: &Connection, content_hash: &str) -> Result<Option<Vec<f32>>> {
    let row: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM embedding_cache WHERE content_hash = ?1",
            params![content_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row.map(|bytes| bytes_to_embedding(&bytes)))
}

/// Top-k nearest non-archived memories by cosine similarity.
///
/// Tries vec0 KNN first; on any vec0 error falls back to brute-force cosine
/// over the embedding cache joined to the live index.
pub fn search(
    conn: &Connection,
    query: &[f32],
    top_k: usize,
    min_similarity: f64,
) -> Result<Vec<VectorHit>> {
    match knn_search(conn, query, top_k) {
        Ok(hits) => Ok(filter_archived(conn, hits, min_similarity)?),
        Err(e) => {
            debug!(error = %e, "vec0 unavailable, brute-force fallback");
            brute_force_search(conn, query, top_k, min_similarity)
        }
    }
}

fn knn_search(conn: &Connection, query: &[f32], top_k: usize) -> rusqlite::Result<Vec<VectorHit>> {
    let bytes = embedding_to_bytes(query);
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM memory_vec \
         WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2",
    )?;
    let hits = stmt
        .query_map(params![bytes, top_k as i64], |row| {
            let id: String = row.get(0)?;
            let distance: f64 = row.get(1)?;
            Ok(VectorHit {
                id,
                similarity: l2_distance_to_cosine(distance),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(hits)
}

fn filter_archived(
    conn: &Connection,
    hits: Vec<VectorHit>,
    min_similarity: f64,
) -> Result<Vec<VectorHit>> {
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        if hit.similarity < min_similarity {
            continue;
        }
        let live: Option<i64> = conn
            .query_row(
                "SELECT archived FROM memory_index WHERE id = ?1",
                params![hit.id],
                |row| row.get(0),
            )
            .optional()?;
        if live == Some(0) {
            out.push(hit);
        }
    }
    Ok(out)
}

/// Exact cosine over every cached embedding with a live, non-archived
/// index row. O(corpus) but always available.
fn brute_force_search(
    conn: &Connection,
    query: &[f32],
    top_k: usize,
    min_similarity: f64,
) -> Result<Vec<VectorHit>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, e.embedding FROM memory_index m \
         JOIN embedding_cache e ON m.content_hash = e.content_hash \
         WHERE m.archived = 0",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut hits: Vec<VectorHit> = rows
        .into_iter()
        .map(|(id, bytes)| {
            let emb = bytes_to_embedding(&bytes);
            VectorHit {
                id,
                similarity: crate::embedding::cosine_similarity(query, &emb),
            }
        })
        .filter(|h| h.similarity >= min_similarity)
        .collect();

    hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(top_k);
    Ok(hits)
}

/// Sanity check used by reindex: embeddings must match the model dimension.
pub fn validate_dimension(embedding: &[f32]) -> Result<()> {
    if embedding.len() != EMBEDDING_DIM {
        return Err(crate::error::EngramError::InvalidInput(format!(
            "embedding has {} dimensions, expected {EMBEDDING_DIM}",
            embedding.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Connection {
        db::open_memory_intelligence_db()
    }

    fn index_row(conn: &Connection, id: &str, content: &str, hash: &str, archived: bool) {
        conn.execute(
            "INSERT INTO memory_index (id, content, project, scope, tags, importance, created, \
             last_reinforced, reinforcement_count, source_session, archived, content_hash) \
             VALUES (?1, ?2, 'p', 'project', '[]', 0.5, ?3, ?3, 1, 'unknown', ?4, ?5)",
            params![id, content, Utc::now().to_rfc3339(), archived as i64, hash],
        )
        .unwrap();
    }

    fn spike(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[dim] = 1.0;
        v
    }

    #[test]
    fn bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(bytes_to_embedding(&embedding_to_bytes(&v)), v);
    }

    #[test]
    fn distance_conversion_matches_cosine() {
        // Identical unit vectors: distance 0 → similarity 1
        assert!((l2_distance_to_cosine(0.0) - 1.0).abs() < 1e-9);
        // Orthogonal unit vectors: distance √2 → similarity 0
        assert!(l2_distance_to_cosine(std::f64::consts::SQRT_2).abs() < 1e-9);
        // Opposite unit vectors: distance 2 → similarity −1
        assert!((l2_distance_to_cosine(2.0) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn upsert_and_search_returns_nearest() {
        let conn = test_db();
        index_row(&conn, "m-1", "alpha", "hash-1", false);
        index_row(&conn, "m-2", "beta", "hash-2", false);
        upsert(&conn, "m-1", "hash-1", &spike(0)).unwrap();
        upsert(&conn, "m-2", "hash-2", &spike(100)).unwrap();

        let hits = search(&conn, &spike(0), 10, 0.0).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "m-1");
        assert!((hits[0].similarity - 1.0).abs() < 1e-4);
    }

    #[test]
    fn search_skips_archived() {
        let conn = test_db();
        index_row(&conn, "m-1", "alpha", "hash-1", true);
        upsert(&conn, "m-1", "hash-1", &spike(0)).unwrap();

        let hits = search(&conn, &spike(0), 10, 0.0).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_applies_similarity_threshold() {
        let conn = test_db();
        index_row(&conn, "m-1", "alpha", "hash-1", false);
        upsert(&conn, "m-1", "hash-1", &spike(0)).unwrap();

        // Orthogonal query: similarity 0, below 0.65
        let hits = search(&conn, &spike(50), 10, 0.65).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn brute_force_matches_knn_ordering() {
        let conn = test_db();
        for (i, id) in ["m-1", "m-2", "m-3"].iter().enumerate() {
            let hash = format!("hash-{i}");
            index_row(&conn, id, "content", &hash, false);
            upsert(&conn, id, &hash, &spike(i * 10)).unwrap();
        }

        let knn = search(&conn, &spike(10), 3, 0.0).unwrap();
        let brute = brute_force_search(&conn, &spike(10), 3, 0.0).unwrap();
        assert_eq!(knn[0].id, "m-2");
        assert_eq!(brute[0].id, "m-2");
    }

    #[test]
    fn cached_embedding_survives_by_hash() {
        let conn = test_db();
        index_row(&conn, "m-1", "alpha", "hash-1", false);
        upsert(&conn, "m-1", "hash-1", &spike(3)).unwrap();

        let cached = cached(&conn, "hash-1").unwrap().unwrap();
        assert_eq!(cached, spike(3));
        assert!(super::cached(&conn, "hash-missing").unwrap().is_none());
    }

    #[test]
    fn update_replaces_vec_row() {
        let conn = test_db();
        index_row(&conn, "m-1", "alpha", "hash-1", false);
        upsert(&conn, "m-1", "hash-1", &spike(0)).unwrap();
        // Content edit: new hash, new embedding
        upsert(&conn, "m-1", "hash-2", &spike(200)).unwrap();

        let hits = search(&conn, &spike(200), 10, 0.5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m-1");
    }
}
