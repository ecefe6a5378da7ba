//! Session consolidator — extract → dedupe → persist → reinforce.
//!
//! The end of every session flows through here: the transcript is
//! normalized, candidates are extracted (patterns always, the LLM when
//! configured and its circuit is closed), fuzzy-deduplicated against the
//! existing corpus, and either persisted as new project-scoped memories or
//! converted into reinforcement events on the memories they duplicate.

pub mod llm;
pub mod patterns;
pub mod transcript;

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::graph::{self, RelationType};
use crate::scheduler::{self, Grade};
use crate::store::types::{ListFilter, Memory, MemoryDraft, Scope};
use self::llm::LlmExtractor;
use self::patterns::{Candidate, Family};

/// Session quality: how much reusable knowledge the session produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionQuality {
    pub total: usize,
    pub high_value: usize,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct ConsolidationResult {
    pub session_id: String,
    pub extracted: usize,
    pub saved: Vec<String>,
    pub deduplicated: usize,
    pub reinforced: Vec<String>,
    pub quality: SessionQuality,
}

/// Consolidate a transcript file. The session id defaults to the file stem.
pub fn consolidate_file(
    engine: &mut Engine,
    path: impl AsRef<Path>,
    session_id: Option<&str>,
    project_id: &str,
    use_llm: bool,
) -> Result<ConsolidationResult> {
    let path = path.as_ref();
    let session_id = session_id
        .map(str::to_string)
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".into());

    let messages = transcript::read_transcript(path)?;
    consolidate_messages(engine, &messages, &session_id, project_id, use_llm)
}

/// The full pipeline over normalized messages.
pub fn consolidate_messages(
    engine: &mut Engine,
    messages: &[transcript::TranscriptMessage],
    session_id: &str,
    project_id: &str,
    use_llm: bool,
) -> Result<ConsolidationResult> {
    let conversation = transcript::conversation_text(messages);
    if conversation.len() < engine.config.consolidation.min_conversation_chars {
        debug!(session = session_id, "conversation too short, skipping");
        return Ok(empty_result(session_id));
    }

    // 1. Extract candidates: patterns always, LLM when enabled.
    let mut candidates = patterns::extract(&conversation);
    if use_llm && engine.config.consolidation.llm_enabled && conversation.len() > 200 {
        candidates.extend(llm_candidates(engine, &conversation));
    }
    let candidates = dedupe_candidates(candidates);
    let quality = session_quality(&candidates);

    // 2. Dedup against the existing corpus; duplicates reinforce instead.
    let existing = engine.store.list_full(&ListFilter::default())?;
    let dedup_ratio = engine.config.consolidation.dedup_ratio;

    let mut saved = Vec::new();
    let mut reinforced = Vec::new();
    let mut saved_learnings: Vec<String> = Vec::new();
    let mut saved_solutions: Vec<String> = Vec::new();

    for candidate in &candidates {
        let words = word_set(&candidate.content);
        if words.is_empty() {
            continue;
        }

        match find_duplicate(&words, &existing, dedup_ratio) {
            Some(matched) => {
                reinforce_duplicate(engine, matched, project_id, &mut reinforced)?;
            }
            None => {
                let memory = engine.remember(MemoryDraft {
                    content: candidate.content.clone(),
                    scope: Scope::Project,
                    project: project_id.to_string(),
                    tags: candidate.tags(),
                    importance: Some(candidate.importance),
                    source_session: Some(session_id.to_string()),
                })?;

                match candidate.family {
                    Family::Correction => {
                        link_contradicted_source(engine, &memory, &words, &existing)?;
                    }
                    Family::Learning => saved_learnings.push(memory.id().to_string()),
                    Family::ProblemSolution => saved_solutions.push(memory.id().to_string()),
                    _ => {}
                }
                saved.push(memory.id().to_string());
            }
        }
    }

    // 3. Session-local edges: learnings relate to the session's decisions.
    for learning in &saved_learnings {
        for solution in &saved_solutions {
            graph::link(
                &engine.intel,
                learning,
                solution,
                RelationType::Related,
                0.5,
                Some("same session"),
                "consolidator",
            )?;
        }
    }

    let result = ConsolidationResult {
        session_id: session_id.to_string(),
        extracted: candidates.len(),
        deduplicated: candidates.len() - saved.len(),
        saved,
        reinforced,
        quality,
    };
    info!(
        session = session_id,
        extracted = result.extracted,
        saved = result.saved.len(),
        reinforced = result.reinforced.len(),
        quality = result.quality.score,
        "session consolidated"
    );
    Ok(result)
}

fn empty_result(session_id: &str) -> ConsolidationResult {
    ConsolidationResult {
        session_id: session_id.to_string(),
        extracted: 0,
        saved: Vec::new(),
        deduplicated: 0,
        reinforced: Vec::new(),
        quality: SessionQuality {
            total: 0,
            high_value: 0,
            score: 0.0,
        },
    }
}

/// LLM extraction behind the `llm_extraction` breaker. Any failure —
/// circuit open, timeout, unparsable output — degrades to pattern-only.
fn llm_candidates(engine: &mut Engine, conversation: &str) -> Vec<Candidate> {
    let extractor = match llm::ShellExtractor::from_config(&engine.config.consolidation) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "llm extractor misconfigured, pattern-only");
            return Vec::new();
        }
    };
    let prompt = llm::extraction_prompt(conversation);

    let response = match engine
        .breakers
        .call(&engine.intel, "llm_extraction", || extractor.extract(&prompt, ""))
    {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "llm extraction unavailable, pattern-only");
            return Vec::new();
        }
    };

    match llm::parse_learnings(&response) {
        Ok(learnings) => learnings
            .into_iter()
            .map(|l| Candidate {
                content: l.content,
                importance: l.importance.clamp(0.0, 0.95),
                family: Family::Llm,
            })
            .collect(),
        Err(e) => {
            debug!(error = %e, "unparsable llm output, pattern-only");
            Vec::new()
        }
    }
}

/// Drop candidates that duplicate an earlier (higher-importance) candidate
/// from the same session.
fn dedupe_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<Candidate> = Vec::new();
    let mut kept_words: Vec<HashSet<String>> = Vec::new();
    for candidate in candidates {
        let words = word_set(&candidate.content);
        if words.is_empty() {
            continue;
        }
        let duplicate = kept_words
            .iter()
            .any(|existing| overlap_max(&words, existing) >= 0.7);
        if !duplicate {
            kept_words.push(words);
            kept.push(candidate);
        }
    }
    kept
}

/// A duplicate reinforces the matched memory: importance boost via the
/// store, plus a scheduler grade — GOOD for a same-project
/// reconfirmation, EASY for a cross-project one.
fn reinforce_duplicate(
    engine: &mut Engine,
    matched: &Memory,
    project_id: &str,
    reinforced: &mut Vec<String>,
) -> Result<()> {
    engine.reinforce(matched.id())?;

    let grade = if matched.meta.project == project_id {
        Grade::Good
    } else {
        Grade::Easy
    };
    scheduler::record_review(&mut engine.fsrs, matched.id(), grade, Some(project_id))?;
    reinforced.push(matched.id().to_string());
    Ok(())
}

/// A correction contradicts whatever prior memory it most overlaps, when
/// the overlap is meaningful at all.
fn link_contradicted_source(
    engine: &Engine,
    correction: &Memory,
    correction_words: &HashSet<String>,
    existing: &[Memory],
) -> Result<()> {
    let best = existing
        .iter()
        .map(|m| (m, overlap_max(correction_words, &word_set(&m.content))))
        .filter(|(_, score)| *score >= 0.3)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    if let Some((source, _)) = best {
        graph::link(
            &engine.intel,
            correction.id(),
            source.id(),
            RelationType::Contradicts,
            0.6,
            Some("session correction"),
            "consolidator",
        )?;
    }
    Ok(())
}

fn find_duplicate<'a>(
    candidate_words: &HashSet<String>,
    existing: &'a [Memory],
    dedup_ratio: f64,
) -> Option<&'a Memory> {
    existing.iter().find(|memory| {
        let existing_words = word_set(&memory.content);
        !existing_words.is_empty() && overlap_max(candidate_words, &existing_words) >= dedup_ratio
    })
}

/// Bidirectional overlap: `max(|A∩B|/|A|, |A∩B|/|B|)`. Catches both "short
/// version of existing" and "existing is a short version of new".
fn overlap_max(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    (shared / a.len() as f64).max(shared / b.len() as f64)
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Quality = 0.5 × min(1, high_value/3) + 0.5 × mean(importance), where
/// high value means importance ≥ 0.7.
fn session_quality(candidates: &[Candidate]) -> SessionQuality {
    if candidates.is_empty() {
        return SessionQuality {
            total: 0,
            high_value: 0,
            score: 0.0,
        };
    }
    let total = candidates.len();
    let high_value = candidates.iter().filter(|c| c.importance >= 0.7).count();
    let mean = candidates.iter().map(|c| c.importance).sum::<f64>() / total as f64;
    let score = 0.5 * (high_value as f64 / 3.0).min(1.0) + 0.5 * mean;
    SessionQuality {
        total,
        high_value,
        score,
    }
}
