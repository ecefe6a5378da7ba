//! `engram search` — hybrid query from the terminal.

use crate::config::EngramConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::search::{self, SearchRequest};
use crate::store::types::Scope;

#[allow(clippy::too_many_arguments)]
pub fn run(
    config: &EngramConfig,
    query: &str,
    project: Option<&str>,
    tags: &[String],
    min_importance: Option<f64>,
    scope: Option<Scope>,
    limit: usize,
) -> Result<()> {
    let mut engine = Engine::open(config.clone())?;
    engine.load_embedder()?;

    let request = SearchRequest {
        query: query.to_string(),
        project: project.map(str::to_string),
        tags: tags.to_vec(),
        min_importance,
        scope,
        limit,
    };
    let hits = search::search(&engine, &request)?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let cached = if hits.iter().any(|h| h.from_cache) {
        " (cached)"
    } else {
        ""
    };
    println!("Found {} result(s){cached}\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "  {}. {} [{}] score {:.3} (sem {:.2} · kw {:.2} · rec {:.2} · imp {:.2})",
            i + 1,
            hit.id,
            hit.scope,
            hit.score,
            hit.semantic,
            hit.keyword,
            hit.recency,
            hit.importance,
        );
        println!("     {}", hit.snippet.replace('\n', " "));
        if !hit.reasons.is_empty() {
            println!("     matched: {}", hit.reasons.join(", "));
        }
        println!();
    }

    engine.teardown()?;
    Ok(())
}
