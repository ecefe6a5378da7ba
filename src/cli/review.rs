//! `engram review` — the spaced-repetition surface.

use crate::config::EngramConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::promotion;
use crate::scheduler::{self, Grade};

/// `review next` — memories due for review, highest priority first.
pub fn next(config: &EngramConfig, limit: usize, project: Option<&str>) -> Result<()> {
    let engine = Engine::open(config.clone())?;

    let due = scheduler::due_reviews(&engine.fsrs, &engine.intel, limit, project)?;
    if due.is_empty() {
        println!("Nothing due for review.");
        return Ok(());
    }

    println!("{} memor{} due:\n", due.len(), if due.len() == 1 { "y" } else { "ies" });
    for review in &due {
        let memory = engine.store.read(&review.memory_id)?;
        println!(
            "  {} (priority {:.0}, {}d overdue, importance {:.2})",
            review.memory_id, review.priority, review.days_overdue, review.importance
        );
        println!("    {}", super::preview(&memory.content, 100));
    }
    Ok(())
}

/// `review record <id> <grade>` — record an outcome and update the
/// schedule. GOOD and EASY also reinforce importance; a qualifying memory
/// is promoted immediately rather than waiting for the weekly sweep.
pub fn record(config: &EngramConfig, memory_id: &str, grade: Grade) -> Result<()> {
    let mut engine = Engine::open(config.clone())?;

    // Verify the memory exists before touching scheduler state.
    engine.store.read(memory_id)?;

    let project = engine.config.storage.project_id.clone();
    let outcome = scheduler::record_review(&mut engine.fsrs, memory_id, grade, Some(&project))?;

    if matches!(grade, Grade::Good | Grade::Easy) {
        engine.reinforce(memory_id)?;
    }

    println!(
        "Recorded {} for {memory_id}: stability {:.2}, difficulty {:.2}, interval {}d -> {}d",
        grade.as_str(),
        outcome.state.stability,
        outcome.state.difficulty,
        outcome.prev_interval_days,
        outcome.new_interval_days,
    );

    if promotion::promote_if_eligible(&engine, memory_id)? {
        println!("Promoted {memory_id} to global scope.");
    }

    engine.teardown()?;
    Ok(())
}
