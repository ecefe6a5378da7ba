//! `engram relate` — create a typed edge between two memories.

use crate::config::EngramConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::graph::{self, RelationType};

pub fn run(
    config: &EngramConfig,
    from: &str,
    to: &str,
    relationship_type: RelationType,
    strength: f64,
    evidence: Option<&str>,
) -> Result<()> {
    let engine = Engine::open(config.clone())?;

    // Both endpoints must exist — NotFound surfaces as exit code 2.
    engine.store.read(from)?;
    engine.store.read(to)?;

    let edge_id = graph::link(
        &engine.intel,
        from,
        to,
        relationship_type,
        strength,
        evidence,
        "manual",
    )?;

    println!(
        "{from} --{}({:.2})--> {to} [{edge_id}]",
        relationship_type.as_str(),
        strength
    );

    // Show what the graph now knows around the source.
    let contradictions = graph::detect_contradictions(&engine.intel, from)?;
    if !contradictions.is_empty() {
        println!("\n{from} is contradicted by / contradicts:");
        for (other, rel) in contradictions {
            println!("  {} (strength {:.2})", other, rel.strength);
        }
    }
    Ok(())
}
