//! Derived index sync — markdown truth in, SQL rows out.
//!
//! `memory_index` mirrors frontmatter for fast filtered queries, and
//! `memory_fts` carries non-archived content for BM25. Both are derived:
//! [`rebuild`] reconstructs them (and the embedding caches) from the files.

use rusqlite::{params, Connection};
use tracing::info;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::store::types::{ListFilter, Memory};
use crate::store::{content_hash, MemoryStore};

/// Upsert one memory into the derived index. Archived memories keep their
/// index row (flagged) but leave the keyword index.
pub fn index_memory(conn: &Connection, memory: &Memory) -> Result<()> {
    let meta = &memory.meta;
    let hash = content_hash(&memory.content);
    conn.execute(
        "INSERT INTO memory_index \
           (id, content, project, scope, tags, importance, created, last_reinforced, \
            reinforcement_count, source_session, archived, content_hash) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12) \
         ON CONFLICT(id) DO UPDATE SET \
           content = excluded.content, \
           project = excluded.project, \
           scope = excluded.scope, \
           tags = excluded.tags, \
           importance = excluded.importance, \
           last_reinforced = excluded.last_reinforced, \
           reinforcement_count = excluded.reinforcement_count, \
           archived = excluded.archived, \
           content_hash = excluded.content_hash",
        params![
            meta.id,
            memory.content,
            meta.project,
            meta.scope.as_str(),
            serde_json::to_string(&meta.tags)?,
            meta.importance,
            meta.created.to_rfc3339(),
            meta.last_reinforced.to_rfc3339(),
            meta.reinforcement_count,
            meta.source_session,
            meta.archived as i64,
            hash,
        ],
    )?;

    conn.execute("DELETE FROM memory_fts WHERE id = ?1", params![meta.id])?;
    if !meta.archived {
        conn.execute(
            "INSERT INTO memory_fts (content, id) VALUES (?1, ?2)",
            params![memory.content, meta.id],
        )?;
    } else {
        crate::vector::remove(conn, &meta.id)?;
    }
    Ok(())
}

/// Drop a memory from all derived tables.
pub fn deindex_memory(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM memory_index WHERE id = ?1", params![id])?;
    conn.execute("DELETE FROM memory_fts WHERE id = ?1", params![id])?;
    crate::vector::remove(conn, id)?;
    Ok(())
}

/// Offline full rebuild: wipe the derived tables and reconstruct them from
/// the markdown tree, re-embedding content whose hash is not already cached.
pub fn rebuild(
    conn: &Connection,
    store: &MemoryStore,
    embedder: &dyn EmbeddingProvider,
) -> Result<RebuildReport> {
    conn.execute("DELETE FROM memory_index", [])?;
    conn.execute("DELETE FROM memory_fts", [])?;
    let _ = conn.execute("DELETE FROM memory_vec", []);

    let filter = ListFilter {
        include_archived: true,
        ..Default::default()
    };

    let mut report = RebuildReport::default();
    for memory in store.list_full(&filter)? {
        index_memory(conn, &memory)?;
        report.indexed += 1;

        if memory.meta.archived {
            continue;
        }
        let hash = content_hash(&memory.content);
        let embedding = match crate::vector::cached(conn, &hash)? {
            Some(cached) => {
                report.embeddings_reused += 1;
                cached
            }
            None => {
                report.embeddings_computed += 1;
                embedder.embed(&memory.content)?
            }
        };
        crate::vector::validate_dimension(&embedding)?;
        crate::vector::upsert(conn, memory.id(), &hash, &embedding)?;
    }

    info!(
        indexed = report.indexed,
        reused = report.embeddings_reused,
        computed = report.embeddings_computed,
        "index rebuilt"
    );
    Ok(report)
}

#[derive(Debug, Default)]
pub struct RebuildReport {
    pub indexed: usize,
    pub embeddings_reused: usize,
    pub embeddings_computed: usize,
}
