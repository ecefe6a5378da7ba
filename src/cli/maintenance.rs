//! `engram maintenance` and `engram freshness` — the background jobs an
//! external scheduler drives daily and weekly.

use crate::config::EngramConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::maintenance;

/// Run the daily pipeline: decay, archival, health check, stats snapshot.
pub fn daily(config: &EngramConfig, dry_run: bool, memory_dir: Option<&str>) -> Result<()> {
    let mut config = config.clone();
    if let Some(dir) = memory_dir {
        config.storage.memory_dir = dir.to_string();
    }
    let engine = Engine::open(config)?;

    let report = maintenance::run_daily(&engine, dry_run)?;

    if dry_run {
        println!("Daily maintenance (dry run — nothing written):");
    } else {
        println!("Daily maintenance complete in {}ms:", report.duration_ms);
    }
    println!("  decayed:  {}", report.decayed);
    println!("  archived: {}", report.archived.len());
    for id in &report.archived {
        println!("    - {id}");
    }
    println!(
        "  health:   {} files, {} corrupt, {} quarantined",
        report.health.file_count, report.health.corrupt_files, report.health.quarantined
    );
    println!(
        "  stats:    {} memories, {} high-importance, avg {:.3}",
        report.stats.total, report.stats.high_importance, report.stats.avg_importance
    );

    engine.teardown()?;
    Ok(())
}

/// Weekly freshness review: scan, or act on a single memory.
pub fn freshness(
    config: &EngramConfig,
    refresh: Option<&str>,
    archive: Option<&str>,
    days: Option<i64>,
) -> Result<()> {
    let engine = Engine::open(config.clone())?;

    if let Some(id) = refresh {
        let memory = engine.reinforce(id)?;
        println!(
            "Refreshed {id} (importance {:.2}, reinforcement #{})",
            memory.meta.importance, memory.meta.reinforcement_count
        );
        return Ok(());
    }

    if let Some(id) = archive {
        engine.archive(id, "stale")?;
        println!("Archived {id} (reason: stale)");
        return Ok(());
    }

    if let Some(days) = days {
        // A narrowed scan is read-only — no events, no promotion sweep.
        let stale = maintenance::freshness_scan(&engine, Some(days))?;
        println!("{}", maintenance::freshness_summary(&stale, 10));
        return Ok(());
    }

    // Default: the full weekly job — scan, summary event, promotion sweep.
    let (stale, promoted) = maintenance::run_weekly(&engine, false)?;
    println!("{}", maintenance::freshness_summary(&stale, 10));
    if !promoted.promoted.is_empty() {
        println!("\nPromoted to global scope:");
        for id in &promoted.promoted {
            println!("  * {id}");
        }
    }

    engine.teardown()?;
    Ok(())
}
