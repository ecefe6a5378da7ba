//! `engram reindex` — offline rebuild of the derived index and caches.
//!
//! Reads every markdown file and rewrites the SQL index, the keyword
//! index, and both embedding caches. The recovery path for a lost or
//! corrupt intelligence database.

use crate::config::EngramConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::index;

pub fn run(config: &EngramConfig) -> Result<()> {
    let mut engine = Engine::open(config.clone())?;
    engine.load_embedder()?;

    println!("Rebuilding derived index from {}...", engine.store.root().display());
    let report = index::rebuild(&engine.intel, &engine.store, engine.embedder()?)?;

    println!(
        "Reindexed {} memories ({} embeddings reused, {} computed).",
        report.indexed, report.embeddings_reused, report.embeddings_computed
    );
    Ok(())
}
