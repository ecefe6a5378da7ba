//! Composition root — owns the store, the three sidecar connections, the
//! embedding provider, and the breaker registry, and keeps the derived
//! state (index, vectors, caches) consistent across every mutation.
//!
//! The lifecycle methods here are the only write paths used by the
//! consolidator, the scheduler, and the CLI: they pair each file write with
//! its index sync and cache invalidation so readers never see stale
//! derived state, no matter which caller mutates a memory.

use rusqlite::Connection;
use tracing::debug;

use crate::breaker::BreakerRegistry;
use crate::config::EngramConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::store::types::{Memory, MemoryDraft, MemoryPatch};
use crate::store::{content_hash, MemoryStore};
use crate::{events, index, search, vector};

pub struct Engine {
    pub config: EngramConfig,
    pub store: MemoryStore,
    pub intel: Connection,
    pub session: Connection,
    pub fsrs: Connection,
    pub breakers: BreakerRegistry,
    embedder: Option<Box<dyn EmbeddingProvider>>,
}

impl Engine {
    /// Open the engine without an embedding provider — enough for the hook,
    /// the queue, and metadata-only operations.
    pub fn open(config: EngramConfig) -> Result<Self> {
        let store = MemoryStore::open(config.memory_dir())?;
        let intel = crate::db::open_intelligence_db(config.intelligence_db())?;
        let session = crate::db::open_session_db(config.session_db())?;
        let fsrs = crate::db::open_fsrs_db(config.fsrs_db())?;
        let breakers = BreakerRegistry::new(config.breaker.clone());
        Ok(Self {
            config,
            store,
            intel,
            session,
            fsrs,
            breakers,
            embedder: None,
        })
    }

    /// Load the configured embedding provider (the ONNX model).
    pub fn load_embedder(&mut self) -> Result<()> {
        let provider = crate::embedding::create_provider(&self.config.embedding)?;
        self.embedder = Some(provider);
        Ok(())
    }

    /// Install a specific provider — used by tests and alternate backends.
    pub fn set_embedder(&mut self, provider: Box<dyn EmbeddingProvider>) {
        self.embedder = Some(provider);
    }

    pub fn embedder(&self) -> Result<&dyn EmbeddingProvider> {
        self.embedder
            .as_deref()
            .ok_or_else(|| EngramError::DependencyFailed("embedding provider not loaded".into()))
    }

    /// Create a memory: classify importance when the draft leaves it unset,
    /// merge trigger-word tags, persist, embed, index, and conservatively
    /// invalidate overlapping cached searches.
    pub fn remember(&self, mut draft: MemoryDraft) -> Result<Memory> {
        if draft.importance.is_none() {
            draft.importance = Some(crate::importance::classify(&draft.content));
        }
        for trigger in crate::importance::detect_triggers(&draft.content) {
            if !draft.tags.contains(&trigger) {
                draft.tags.push(trigger);
            }
        }

        let memory = self.store.create(draft)?;
        self.sync_derived(&memory)?;
        search::cache::invalidate_for_create(&self.intel, &memory.content)?;
        Ok(memory)
    }

    /// Apply a patch. Content edits regenerate the embedding (the hash
    /// changes) and drop every cached search containing the id.
    pub fn edit(&self, id: &str, patch: MemoryPatch) -> Result<Memory> {
        let memory = self.store.update(id, patch)?;
        self.sync_derived(&memory)?;
        search::cache::invalidate_for_id(&self.intel, id)?;
        Ok(memory)
    }

    /// Reinforcement: bump count/timestamp/importance, resync, invalidate.
    pub fn reinforce(&self, id: &str) -> Result<Memory> {
        let cfg = &self.config.importance;
        let memory = self
            .store
            .reinforce(id, cfg.reinforce_factor, cfg.reinforce_cap)?;
        self.sync_derived(&memory)?;
        search::cache::invalidate_for_id(&self.intel, id)?;
        Ok(memory)
    }

    pub fn archive(&self, id: &str, reason: &str) -> Result<Memory> {
        let memory = self.store.archive(id, reason)?;
        index::index_memory(&self.intel, &memory)?;
        search::cache::invalidate_for_id(&self.intel, id)?;
        events::emit(
            &self.intel,
            "memory_archived",
            Some(id),
            serde_json::json!({ "reason": reason }),
        );
        Ok(memory)
    }

    pub fn restore(&self, id: &str) -> Result<Memory> {
        let memory = self.store.restore(id)?;
        self.sync_derived(&memory)?;
        search::cache::invalidate_for_id(&self.intel, id)?;
        Ok(memory)
    }

    /// Persist breaker state and flush. Call before process exit.
    pub fn teardown(&self) -> Result<()> {
        self.breakers.persist_all(&self.intel)?;
        Ok(())
    }

    /// Index + (re)embed a live memory. Archived memories only sync the
    /// index row; their vectors and keyword rows are dropped.
    fn sync_derived(&self, memory: &Memory) -> Result<()> {
        index::index_memory(&self.intel, memory)?;
        if memory.meta.archived {
            return Ok(());
        }

        let hash = content_hash(&memory.content);
        let embedding = match vector::cached(&self.intel, &hash)? {
            Some(cached) => cached,
            None => match self.embedder {
                Some(ref embedder) => embedder.embed(&memory.content)?,
                None => {
                    // No provider loaded (hook path): the index row is
                    // enough; reindex or the next embedded write heals it.
                    debug!(id = memory.id(), "skipping embedding, no provider loaded");
                    return Ok(());
                }
            },
        };
        vector::validate_dimension(&embedding)?;
        vector::upsert(&self.intel, memory.id(), &hash, &embedding)?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::test_engine;
    use super::*;
    use crate::store::types::Scope;

    fn draft(content: &str, project: &str) -> MemoryDraft {
        MemoryDraft {
            content: content.into(),
            scope: Scope::Project,
            project: project.into(),
            tags: vec![],
            importance: None,
            source_session: None,
        }
    }

    #[test]
    fn remember_classifies_and_indexes() {
        let (_dir, engine) = test_engine();
        let m = engine
            .remember(draft("I learned that the production deploy failed", "alpha"))
            .unwrap();

        // Importance classified (production + failed + learned signals)
        assert!(m.meta.importance > 0.5);
        // Trigger words became tags
        assert!(m.meta.tags.iter().any(|t| t == "learned"));

        // Index row and vector present
        let count: i64 = engine
            .intel
            .query_row("SELECT COUNT(*) FROM memory_index", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let emb = engine.embedder().unwrap().embed(&m.content).unwrap();
        let hits = vector::search(&engine.intel, &emb, 5, 0.9).unwrap();
        assert_eq!(hits[0].id, m.id().to_string());
    }

    #[test]
    fn edit_reembeds_changed_content() {
        let (_dir, engine) = test_engine();
        let m = engine
            .remember(draft("Original statement about caching layers", "alpha"))
            .unwrap();

        engine
            .edit(
                m.id(),
                MemoryPatch {
                    content: Some("Completely different topic entirely now".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let new_emb = engine
            .embedder()
            .unwrap()
            .embed("Completely different topic entirely now")
            .unwrap();
        let hits = vector::search(&engine.intel, &new_emb, 5, 0.9).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, m.id().to_string());
    }

    #[test]
    fn archive_drops_vector_and_keyword_rows() {
        let (_dir, engine) = test_engine();
        let m = engine
            .remember(draft("Ephemeral detail about test fixtures", "alpha"))
            .unwrap();
        engine.archive(m.id(), "decayed").unwrap();

        let emb = engine.embedder().unwrap().embed(&m.content).unwrap();
        assert!(vector::search(&engine.intel, &emb, 5, 0.5).unwrap().is_empty());

        // Restore brings it back
        engine.restore(m.id()).unwrap();
        assert_eq!(vector::search(&engine.intel, &emb, 5, 0.5).unwrap().len(), 1);
    }
}
