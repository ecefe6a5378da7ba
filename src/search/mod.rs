//! Hybrid search — semantic + BM25 fusion, multi-factor ranking, caching.
//!
//! Candidates come from two channels: vector KNN over the embeddings and
//! BM25 over the keyword index. Fusion weighs them
//! `hybrid_alpha × semantic + (1 − alpha) × bm25_norm`; the survivors are
//! ranked by `0.5×semantic + 0.2×keyword + 0.2×recency + 0.1×importance`.
//! Each hit carries a highlighted snippet and the reasons it matched.

pub mod analytics;
pub mod bm25;
pub mod cache;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{EngramError, Result};
use crate::store::types::{Memory, Scope};
use crate::store::content_hash;

/// A search request: query text plus the filter bag that keys the cache.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub project: Option<String>,
    pub tags: Vec<String>,
    pub min_importance: Option<f64>,
    pub scope: Option<Scope>,
    pub limit: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            project: None,
            tags: Vec::new(),
            min_importance: None,
            scope: None,
            limit,
        }
    }
}

/// A ranked search hit with explainability fields.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub content: String,
    pub project: String,
    pub scope: Scope,
    pub importance: f64,
    pub created: DateTime<Utc>,
    /// Final ranking score in `[0, 1]`.
    pub score: f64,
    pub semantic: f64,
    pub keyword: f64,
    pub recency: f64,
    /// Best-matching passage (≤ ~200 chars) with `**`-highlighted terms.
    pub snippet: String,
    /// Human-readable match reasons.
    pub reasons: Vec<String>,
    /// Whether this result set came from the query cache.
    pub from_cache: bool,
}

/// Run a hybrid search. Results re-materialize from the store even on a
/// cache hit, so mutated fields are never stale.
pub fn search(engine: &Engine, req: &SearchRequest) -> Result<Vec<SearchHit>> {
    let fp = cache::fingerprint(
        &req.query,
        req.project.as_deref(),
        &req.tags,
        req.min_importance,
        req.scope,
    );

    if let Some(ids) = cache::lookup(&engine.intel, &fp)? {
        debug!(query = %req.query, hits = ids.len(), "search cache hit");
        let memories = materialize(engine, &ids, req)?;
        let mut hits = rank(engine, req, memories)?;
        for hit in &mut hits {
            hit.from_cache = true;
        }
        analytics::record(&engine.session, &req.query, hits.len(), None, None)?;
        return Ok(hits);
    }

    let candidates = gather_candidates(engine, req)?;
    let memories = materialize(engine, &candidates, req)?;
    let mut hits = rank(engine, req, memories)?;
    hits.truncate(req.limit);

    let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
    cache::store(&engine.intel, &fp, &req.query, &ids, &engine.config.search)?;
    analytics::record(&engine.session, &req.query, hits.len(), None, None)?;
    Ok(hits)
}

/// Record that the caller acted on a result — feeds the CTR analytics.
pub fn record_selection(
    engine: &Engine,
    query: &str,
    result_count: usize,
    selected_id: &str,
    position: usize,
) -> Result<()> {
    analytics::record(&engine.session, query, result_count, Some(selected_id), Some(position))
}

// ── Candidate gathering ──────────────────────────────────────────────────

/// Union of the semantic and keyword channels, ordered by the hybrid
/// fusion score.
fn gather_candidates(engine: &Engine, req: &SearchRequest) -> Result<Vec<String>> {
    let config = &engine.config.search;

    let query_embedding = engine.embedder()?.embed(&req.query).map_err(|e| {
        EngramError::DependencyFailed(format!("query embedding failed: {e}"))
    })?;
    let semantic_hits = crate::vector::search(
        &engine.intel,
        &query_embedding,
        config.candidate_limit,
        config.semantic_threshold,
    )?;
    let semantic: HashMap<String, f64> = semantic_hits
        .into_iter()
        .map(|h| (h.id, h.similarity.clamp(0.0, 1.0)))
        .collect();

    let keyword_raw = bm25::keyword_search(&engine.intel, &req.query, config.candidate_limit)?;
    let keyword = bm25::min_max_normalize(&keyword_raw);

    let mut fused: Vec<(String, f64)> = semantic
        .keys()
        .chain(keyword.keys())
        .map(|id| id.clone())
        .collect::<std::collections::HashSet<_>>()
        .into_iter()
        .map(|id| {
            let sem = semantic.get(&id).copied().unwrap_or(0.0);
            let kw = keyword.get(&id).copied().unwrap_or(0.0);
            let hybrid = config.hybrid_alpha * sem + (1.0 - config.hybrid_alpha) * kw;
            (id, hybrid)
        })
        .collect();

    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(config.candidate_limit);
    Ok(fused.into_iter().map(|(id, _)| id).collect())
}

/// Fetch candidates from the store, dropping stale ids and anything the
/// filter bag excludes. Archived memories never surface.
fn materialize(engine: &Engine, ids: &[String], req: &SearchRequest) -> Result<Vec<Memory>> {
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        let memory = match engine.store.read(id) {
            Ok(m) => m,
            Err(EngramError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        if memory.meta.archived {
            continue;
        }
        if let Some(ref project) = req.project {
            // Project filter admits the project's own memories plus globals.
            if &memory.meta.project != project && memory.meta.scope != Scope::Global {
                continue;
            }
        }
        if let Some(scope) = req.scope {
            if memory.meta.scope != scope {
                continue;
            }
        }
        if !req.tags.is_empty() && !req.tags.iter().any(|t| memory.meta.tags.contains(t)) {
            continue;
        }
        if let Some(min) = req.min_importance {
            if memory.meta.importance < min {
                continue;
            }
        }
        out.push(memory);
    }
    Ok(out)
}

// ── Ranking ──────────────────────────────────────────────────────────────

fn rank(engine: &Engine, req: &SearchRequest, memories: Vec<Memory>) -> Result<Vec<SearchHit>> {
    if memories.is_empty() {
        return Ok(Vec::new());
    }
    let config = &engine.config.search;
    let [w_semantic, w_keyword, w_recency, w_importance] = config.rank_weights;
    let now = Utc::now();

    let query_embedding = engine.embedder()?.embed(&req.query).map_err(|e| {
        EngramError::DependencyFailed(format!("query embedding failed: {e}"))
    })?;
    let keyword_raw = bm25::keyword_search(&engine.intel, &req.query, config.candidate_limit)?;
    let keyword = bm25::min_max_normalize(&keyword_raw);

    let mut hits = Vec::with_capacity(memories.len());
    for memory in memories {
        let semantic = semantic_similarity(engine, &query_embedding, &memory)?;
        let kw = keyword.get(memory.id()).copied().unwrap_or(0.0);
        let recency = (1.0 - memory.age_days(now) as f64 / 365.0).clamp(0.0, 1.0);
        let importance = memory.meta.importance.clamp(0.0, 1.0);

        let score = (w_semantic * semantic.clamp(0.0, 1.0)
            + w_keyword * kw
            + w_recency * recency
            + w_importance * importance)
            .clamp(0.0, 1.0);

        let reasons = match_reasons(req, &memory, semantic, kw);
        let snippet = snippet(&memory.content, &req.query);

        hits.push(SearchHit {
            id: memory.meta.id.clone(),
            project: memory.meta.project.clone(),
            scope: memory.meta.scope,
            importance,
            created: memory.meta.created,
            content: memory.content,
            score,
            semantic,
            keyword: kw,
            recency,
            snippet,
            reasons,
            from_cache: false,
        });
    }

    // Ties break by importance, then recency, then id.
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.importance
                    .partial_cmp(&a.importance)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(b.created.cmp(&a.created))
            .then(a.id.cmp(&b.id))
    });
    Ok(hits)
}

/// Cosine against the cached embedding when available; re-embeds otherwise.
fn semantic_similarity(engine: &Engine, query_embedding: &[f32], memory: &Memory) -> Result<f64> {
    let hash = content_hash(&memory.content);
    let embedding = match crate::vector::cached(&engine.intel, &hash)? {
        Some(cached) => cached,
        None => engine.embedder()?.embed(&memory.content)?,
    };
    Ok(crate::embedding::cosine_similarity(query_embedding, &embedding))
}

fn match_reasons(req: &SearchRequest, memory: &Memory, semantic: f64, keyword: f64) -> Vec<String> {
    let mut reasons = Vec::new();
    let query = req.query.trim();
    if query.len() > 3 && memory.content.to_lowercase().contains(&query.to_lowercase()) {
        reasons.push("exact phrase match".to_string());
    }
    if semantic >= 0.8 {
        reasons.push("high semantic similarity".to_string());
    }
    if keyword > 0.0 {
        reasons.push("keyword match".to_string());
    }
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    if memory
        .meta
        .tags
        .iter()
        .any(|t| query_words.contains(&t.to_lowercase()))
    {
        reasons.push("tag match".to_string());
    }
    if req.project.as_deref() == Some(memory.meta.project.as_str()) {
        reasons.push("same project".to_string());
    }
    reasons
}

/// Best-matching passage, up to ~200 chars, query terms wrapped in `**`.
fn snippet(content: &str, query: &str) -> String {
    const WINDOW: usize = 200;
    const LEAD: usize = 60;

    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(regex::escape)
        .collect();

    let lower = content.to_lowercase();
    let start = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .map(|pos| pos.saturating_sub(LEAD))
        .unwrap_or(0);

    let start = floor_char_boundary(content, start);
    let end = floor_char_boundary(content, (start + WINDOW).min(content.len()));
    let mut passage = content[start..end].trim().to_string();
    if start > 0 {
        passage = format!("…{passage}");
    }
    if end < content.len() {
        passage.push('…');
    }

    if terms.is_empty() {
        return passage;
    }
    match Regex::new(&format!("(?i)({})", terms.join("|"))) {
        Ok(re) => re.replace_all(&passage, "**$1**").into_owned(),
        Err(_) => passage,
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_engine;
    use crate::store::types::MemoryDraft;

    fn draft(content: &str, project: &str, importance: f64) -> MemoryDraft {
        MemoryDraft {
            content: content.into(),
            scope: Scope::Project,
            project: project.into(),
            tags: vec![],
            importance: Some(importance),
            source_session: None,
        }
    }

    #[test]
    fn keyword_and_semantic_channels_find_matches() {
        let (_dir, engine) = test_engine();
        engine
            .remember(draft("Authentication tokens expire after one hour", "alpha", 0.8))
            .unwrap();
        engine
            .remember(draft("The deploy pipeline runs on fridays", "alpha", 0.5))
            .unwrap();
        engine
            .remember(draft("Authentication failures spike after deploys", "alpha", 0.6))
            .unwrap();

        let req = SearchRequest::new("authentication", 10);
        let hits = search(&engine, &req).unwrap();
        assert!(hits.len() >= 2);
        assert!(hits.iter().all(|h| h.content.to_lowercase().contains("authentication")
            || h.semantic > 0.0));
        // Highest fused score first, components clipped
        for h in &hits {
            assert!((0.0..=1.0).contains(&h.score));
            assert!((0.0..=1.0).contains(&h.keyword));
            assert!((0.0..=1.0).contains(&h.recency));
        }
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn snippets_highlight_query_terms() {
        let (_dir, engine) = test_engine();
        engine
            .remember(draft(
                "Authentication tokens expire after one hour of inactivity",
                "alpha",
                0.8,
            ))
            .unwrap();

        let hits = search(&engine, &SearchRequest::new("authentication", 10)).unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].snippet.contains("**Authentication**"));
        assert!(hits[0].reasons.contains(&"keyword match".to_string()));
    }

    #[test]
    fn long_content_snippet_is_bounded_and_centered() {
        let (_dir, engine) = test_engine();
        let padding = "irrelevant filler words before the interesting part. ".repeat(10);
        let content = format!("{padding}The authentication subsystem rotates keys nightly.");
        engine.remember(draft(&content, "alpha", 0.7)).unwrap();

        let hits = search(&engine, &SearchRequest::new("authentication", 10)).unwrap();
        assert!(!hits.is_empty());
        let snippet = &hits[0].snippet;
        assert!(snippet.len() < 280);
        assert!(snippet.contains("**authentication**"));
        assert!(snippet.starts_with('…'));
    }

    #[test]
    fn filters_constrain_results() {
        let (_dir, engine) = test_engine();
        engine
            .remember(draft("Shared fact about logging levels", "alpha", 0.9))
            .unwrap();
        engine
            .remember(draft("Private fact about logging format", "beta", 0.9))
            .unwrap();

        let mut req = SearchRequest::new("logging", 10);
        req.project = Some("alpha".into());
        let hits = search(&engine, &req).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].project, "alpha");
        assert!(hits[0].reasons.contains(&"same project".to_string()));
    }

    #[test]
    fn project_filter_admits_globals() {
        let (_dir, engine) = test_engine();
        let m = engine
            .remember(draft("Universal fact about retries", "beta", 0.9))
            .unwrap();
        engine
            .edit(
                m.id(),
                crate::store::types::MemoryPatch {
                    scope: Some(Scope::Global),
                    ..Default::default()
                },
            )
            .unwrap();

        let mut req = SearchRequest::new("retries", 10);
        req.project = Some("alpha".into());
        let hits = search(&engine, &req).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].scope, Scope::Global);
    }

    #[test]
    fn min_importance_filter_applies() {
        let (_dir, engine) = test_engine();
        engine
            .remember(draft("Weak note about formatting", "alpha", 0.3))
            .unwrap();
        engine
            .remember(draft("Strong note about formatting", "alpha", 0.9))
            .unwrap();

        let mut req = SearchRequest::new("formatting", 10);
        req.min_importance = Some(0.5);
        let hits = search(&engine, &req).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].importance >= 0.5);
    }

    #[test]
    fn cache_hit_reflects_fresh_fields() {
        let (_dir, engine) = test_engine();
        for i in 0..4 {
            engine
                .remember(draft(
                    &format!("Observability insight number {i} about tracing spans"),
                    "alpha",
                    0.6,
                ))
                .unwrap();
        }

        let req = SearchRequest::new("observability tracing", 10);
        let first = search(&engine, &req).unwrap();
        assert!(!first.is_empty());
        assert!(!first[0].from_cache);

        // Mutate a non-filter field out-of-band of the cache
        let target = &first[0].id;
        engine.store.reinforce(target, 1.15, 0.95).unwrap();

        let second = search(&engine, &req).unwrap();
        // Reinforce bypassed the engine's invalidation on purpose, so this
        // is a cache hit — and it still sees the new importance.
        let hit = second.iter().find(|h| &h.id == target).unwrap();
        assert!(hit.from_cache);
        assert!(hit.importance > first[0].importance - 1e-9);
    }

    #[test]
    fn mutation_through_engine_invalidates_cache() {
        let (_dir, engine) = test_engine();
        for i in 0..4 {
            engine
                .remember(draft(&format!("Cache warm fact {i} about sharding"), "alpha", 0.6))
                .unwrap();
        }
        let req = SearchRequest::new("sharding", 10);
        let first = search(&engine, &req).unwrap();
        engine.reinforce(&first[0].id).unwrap();

        let second = search(&engine, &req).unwrap();
        assert!(!second[0].from_cache);
    }

    #[test]
    fn archived_memories_never_surface() {
        let (_dir, engine) = test_engine();
        let m = engine
            .remember(draft("Fact destined for the archive", "alpha", 0.6))
            .unwrap();
        engine.archive(m.id(), "decayed").unwrap();

        let hits = search(&engine, &SearchRequest::new("archive destined", 10)).unwrap();
        assert!(hits.is_empty());
    }
}
