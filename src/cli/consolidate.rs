//! `engram consolidate` — run the session consolidator synchronously.

use crate::config::EngramConfig;
use crate::consolidate;
use crate::engine::Engine;
use crate::error::Result;

pub fn run(
    config: &EngramConfig,
    transcript: &str,
    project: Option<&str>,
    session: Option<&str>,
    use_llm: bool,
) -> Result<()> {
    let mut engine = Engine::open(config.clone())?;
    engine.load_embedder()?;

    let project = project.unwrap_or(&config.storage.project_id);
    let result = consolidate::consolidate_file(&mut engine, transcript, session, project, use_llm)?;

    println!(
        "Session {}: {} extracted, {} saved, {} reinforced (quality {:.2})",
        result.session_id,
        result.extracted,
        result.saved.len(),
        result.reinforced.len(),
        result.quality.score,
    );
    for id in &result.saved {
        let memory = engine.store.read(id)?;
        println!(
            "  + {} [{:.2}] {}",
            id,
            memory.meta.importance,
            super::preview(&memory.content, 80)
        );
    }
    for id in &result.reinforced {
        println!("  ~ {id} reinforced");
    }

    engine.teardown()?;
    Ok(())
}
