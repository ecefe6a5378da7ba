//! Cross-project promotion engine.
//!
//! A memory graduates from project to global scope once enough independent
//! projects have reconfirmed it: stability ≥ 3.0, review count ≥ 3, at
//! least two validated projects, and still project-scoped. Promotion is
//! atomic (frontmatter + index + cache invalidation in one pass), emits a
//! `memory_promoted` event, and never reverses automatically.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::engine::Engine;
use crate::error::{EngramError, Result};
use crate::scheduler;
use crate::store::types::{ListFilter, MemoryPatch, Scope};
use crate::events;

#[derive(Debug, Serialize)]
pub struct PromotionOutcome {
    pub checked: usize,
    pub promoted: Vec<String>,
}

/// Promote a single memory when every gate holds. Returns whether a
/// promotion happened. Already-global memories are a no-op, never an error.
pub fn promote_if_eligible(engine: &Engine, memory_id: &str) -> Result<bool> {
    let memory = engine.store.read(memory_id)?;
    if memory.meta.scope == Scope::Global || memory.meta.archived {
        return Ok(false);
    }

    let Some(state) = scheduler::get_state(&engine.fsrs, memory_id)? else {
        return Ok(false);
    };

    let cfg = &engine.config.scheduler;
    let eligible = state.stability >= cfg.promote_min_stability
        && state.review_count >= cfg.promote_min_reviews
        && state.validated_projects.len() >= cfg.promote_min_projects;
    if !eligible {
        return Ok(false);
    }

    let mut tags = memory.meta.tags.clone();
    if !tags.iter().any(|t| t == "promoted") {
        tags.push("promoted".into());
    }

    engine.edit(
        memory_id,
        MemoryPatch {
            scope: Some(Scope::Global),
            tags: Some(tags),
            promoted_at: Some(Utc::now()),
            ..Default::default()
        },
    )?;

    events::emit(
        &engine.intel,
        "memory_promoted",
        Some(memory_id),
        serde_json::json!({
            "stability": state.stability,
            "review_count": state.review_count,
            "validated_projects": state.validated_projects,
        }),
    );
    info!(
        id = memory_id,
        stability = state.stability,
        projects = state.validated_projects.len(),
        "memory promoted to global scope"
    );
    Ok(true)
}

/// Run the promotion check over every project-scoped memory.
pub fn promotion_sweep(engine: &Engine) -> Result<PromotionOutcome> {
    let filter = ListFilter {
        scope: Some(Scope::Project),
        ..Default::default()
    };
    let candidates = engine.store.list(&filter)?;

    let mut outcome = PromotionOutcome {
        checked: candidates.len(),
        promoted: Vec::new(),
    };
    for meta in candidates {
        match promote_if_eligible(engine, &meta.id) {
            Ok(true) => outcome.promoted.push(meta.id),
            Ok(false) => {}
            // A missing file mid-sweep is a skip, not a failed sweep.
            Err(EngramError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_engine;
    use crate::scheduler::Grade;
    use crate::store::types::MemoryDraft;

    fn seeded(engine: &Engine, content: &str) -> String {
        engine
            .remember(MemoryDraft {
                content: content.into(),
                scope: Scope::Project,
                project: "alpha".into(),
                tags: vec![],
                importance: Some(0.7),
                source_session: None,
            })
            .unwrap()
            .meta
            .id
    }

    /// Reviews that leave the memory at S = 1.0 × 1.5 × 2.2 = 3.3 ≥ 3.0,
    /// count 3, validated by two projects.
    fn qualify(engine: &mut Engine, id: &str) {
        scheduler::record_review(&mut engine.fsrs, id, Grade::Good, Some("alpha")).unwrap();
        scheduler::record_review(&mut engine.fsrs, id, Grade::Good, Some("alpha")).unwrap();
        scheduler::record_review(&mut engine.fsrs, id, Grade::Easy, Some("beta")).unwrap();
    }

    #[test]
    fn promotes_when_all_gates_hold() {
        let (_dir, mut engine) = test_engine();
        let id = seeded(&engine, "Feature flags default to off in production");
        qualify(&mut engine, &id);

        assert!(promote_if_eligible(&engine, &id).unwrap());

        let memory = engine.store.read(&id).unwrap();
        assert_eq!(memory.meta.scope, Scope::Global);
        assert!(memory.meta.tags.contains(&"promoted".to_string()));
        assert!(memory.meta.promoted_at.is_some());

        // Event emitted
        let recent = events::recent(&engine.intel, 5).unwrap();
        assert!(recent.iter().any(|(kind, mid, _)| kind == "memory_promoted"
            && mid.as_deref() == Some(id.as_str())));
    }

    #[test]
    fn promotion_is_idempotent() {
        let (_dir, mut engine) = test_engine();
        let id = seeded(&engine, "Idempotent promotion check");
        qualify(&mut engine, &id);

        assert!(promote_if_eligible(&engine, &id).unwrap());
        assert!(!promote_if_eligible(&engine, &id).unwrap());

        let memory = engine.store.read(&id).unwrap();
        assert_eq!(
            memory.meta.tags.iter().filter(|t| *t == "promoted").count(),
            1
        );
    }

    #[test]
    fn each_gate_blocks_alone() {
        let (_dir, mut engine) = test_engine();

        // No FSRS state at all
        let unreviewed = seeded(&engine, "Never reviewed memory");
        assert!(!promote_if_eligible(&engine, &unreviewed).unwrap());

        // Only one validating project (count and stability fine)
        let single = seeded(&engine, "Single project validation only");
        scheduler::record_review(&mut engine.fsrs, &single, Grade::Good, Some("alpha")).unwrap();
        scheduler::record_review(&mut engine.fsrs, &single, Grade::Good, Some("alpha")).unwrap();
        scheduler::record_review(&mut engine.fsrs, &single, Grade::Good, Some("alpha")).unwrap();
        assert!(!promote_if_eligible(&engine, &single).unwrap());

        // Two projects but too few reviews / low stability
        let shallow = seeded(&engine, "Shallow validation depth");
        scheduler::record_review(&mut engine.fsrs, &shallow, Grade::Hard, Some("alpha")).unwrap();
        scheduler::record_review(&mut engine.fsrs, &shallow, Grade::Hard, Some("beta")).unwrap();
        assert!(!promote_if_eligible(&engine, &shallow).unwrap());
    }

    #[test]
    fn sweep_promotes_only_eligible() {
        let (_dir, mut engine) = test_engine();
        let eligible = seeded(&engine, "Eligible for promotion sweep");
        let ineligible = seeded(&engine, "Not yet validated elsewhere");
        qualify(&mut engine, &eligible);

        let outcome = promotion_sweep(&engine).unwrap();
        assert_eq!(outcome.checked, 2);
        assert_eq!(outcome.promoted, vec![eligible.clone()]);

        assert_eq!(engine.store.read(&eligible).unwrap().meta.scope, Scope::Global);
        assert_eq!(engine.store.read(&ineligible).unwrap().meta.scope, Scope::Project);

        // Second sweep finds nothing new
        let again = promotion_sweep(&engine).unwrap();
        assert!(again.promoted.is_empty());
    }
}
