//! Background maintenance — decay sweep, archival, health, freshness.
//!
//! Jobs run as discrete passes driven by an external scheduler (cron,
//! launchd) through the CLI. Every job takes `dry_run`; dry runs write
//! nothing. The decay sweep is idempotent within a day: it decays by the
//! days elapsed since the previous sweep (bounded by the reinforcement
//! age), so re-running converges instead of compounding.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::importance;
use crate::promotion;
use crate::store::types::{ListFilter, MemoryPatch};
use crate::events;

// ── Daily pipeline ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MaintenanceReport {
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u128,
    pub dry_run: bool,
    pub decayed: usize,
    pub archived: Vec<String>,
    pub health: HealthReport,
    pub stats: StatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub accessible: bool,
    pub file_count: usize,
    pub corrupt_files: usize,
    pub quarantined: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub total: usize,
    pub high_importance: usize,
    pub avg_importance: f64,
    pub per_project: HashMap<String, usize>,
    pub per_tag: HashMap<String, usize>,
}

/// Run the daily pipeline: decay, archival, health check, stats snapshot.
pub fn run_daily(engine: &Engine, dry_run: bool) -> Result<MaintenanceReport> {
    let started = std::time::Instant::now();
    let now = Utc::now();

    let decayed = decay_sweep(engine, now, dry_run)?;
    let archived = archival_sweep(engine, now, dry_run)?;
    let health = health_check(engine, dry_run)?;
    let stats = collect_stats(engine)?;

    if !dry_run {
        set_marker(engine, "last_decay_sweep", &now.to_rfc3339())?;
        events::emit(
            &engine.intel,
            "maintenance_complete",
            None,
            serde_json::json!({
                "decayed": decayed,
                "archived": archived.len(),
                "corrupt": health.corrupt_files,
                "total": stats.total,
            }),
        );
    }

    let report = MaintenanceReport {
        timestamp: now,
        duration_ms: started.elapsed().as_millis(),
        dry_run,
        decayed,
        archived,
        health,
        stats,
    };
    info!(
        decayed = report.decayed,
        archived = report.archived.len(),
        dry_run,
        "daily maintenance finished"
    );
    Ok(report)
}

/// Apply importance decay to every live memory.
///
/// The effective decay window is `min(days since last sweep, days since
/// last reinforcement)` — a memory reinforced yesterday decays one day no
/// matter how long the sweep was down, and a second run on the same day
/// decays by zero days (a no-op).
fn decay_sweep(engine: &Engine, now: DateTime<Utc>, dry_run: bool) -> Result<usize> {
    let last_sweep: Option<DateTime<Utc>> = get_marker(engine, "last_decay_sweep")?
        .and_then(|s| s.parse().ok());
    let rate = engine.config.importance.decay_rate;

    let mut decayed = 0;
    for meta in engine.store.list(&ListFilter::default())? {
        let since_reinforced = (now - meta.last_reinforced).num_days().max(0);
        let window = match last_sweep {
            Some(last) => since_reinforced.min((now - last).num_days().max(0)),
            None => since_reinforced,
        };
        if window == 0 {
            continue;
        }

        let new_importance = importance::decay(meta.importance, window, rate);
        if (new_importance - meta.importance).abs() < f64::EPSILON {
            continue;
        }
        if !dry_run {
            engine.edit(
                &meta.id,
                MemoryPatch {
                    importance: Some(new_importance),
                    ..Default::default()
                },
            )?;
        }
        decayed += 1;
    }
    Ok(decayed)
}

/// Archive memories that decayed below the threshold and went stale.
fn archival_sweep(engine: &Engine, now: DateTime<Utc>, dry_run: bool) -> Result<Vec<String>> {
    let cfg = &engine.config.importance;
    let mut archived = Vec::new();
    for meta in engine.store.list(&ListFilter::default())? {
        let stale_days = (now - meta.last_reinforced).num_days().max(0);
        if importance::archivable(meta.importance, stale_days, cfg) {
            if !dry_run {
                engine.archive(&meta.id, "decayed")?;
            }
            archived.push(meta.id);
        }
    }
    Ok(archived)
}

/// File-level health: directory accessibility, file count, corruption.
/// Corrupt files are quarantined outside dry runs, never dropped silently.
fn health_check(engine: &Engine, dry_run: bool) -> Result<HealthReport> {
    let accessible = engine.store.root().is_dir();
    if !accessible {
        warn!(dir = %engine.store.root().display(), "memory directory inaccessible");
        return Ok(HealthReport {
            accessible: false,
            file_count: 0,
            corrupt_files: 0,
            quarantined: 0,
        });
    }

    let file_count = engine.store.file_count()?;
    let corrupt_files = engine.store.count_corrupt()?;
    let quarantined = if dry_run || corrupt_files == 0 {
        0
    } else {
        engine.store.quarantine_corrupt()?.quarantined
    };

    Ok(HealthReport {
        accessible,
        file_count,
        corrupt_files,
        quarantined,
    })
}

fn collect_stats(engine: &Engine) -> Result<StatsSnapshot> {
    let metas = engine.store.list(&ListFilter::default())?;
    if metas.is_empty() {
        return Ok(StatsSnapshot {
            total: 0,
            high_importance: 0,
            avg_importance: 0.0,
            per_project: HashMap::new(),
            per_tag: HashMap::new(),
        });
    }

    let total = metas.len();
    let high_importance = metas.iter().filter(|m| m.importance >= 0.8).count();
    let avg_importance = metas.iter().map(|m| m.importance).sum::<f64>() / total as f64;

    let mut per_project = HashMap::new();
    let mut per_tag = HashMap::new();
    for meta in &metas {
        *per_project.entry(meta.project.clone()).or_insert(0) += 1;
        for tag in &meta.tags {
            *per_tag.entry(tag.clone()).or_insert(0) += 1;
        }
    }

    Ok(StatsSnapshot {
        total,
        high_importance,
        avg_importance,
        per_project,
        per_tag,
    })
}

// ── Weekly freshness review ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessCategory {
    /// Still important — worth a human refresh.
    RefreshCandidate,
    /// Low importance and stale — archival is the likely outcome.
    ArchiveCandidate,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleMemory {
    pub id: String,
    pub project: String,
    pub days_stale: i64,
    pub importance: f64,
    /// Older and less important sorts higher.
    pub staleness_score: f64,
    pub category: FreshnessCategory,
    pub preview: String,
}

/// Scan for memories past the staleness window, most urgent first.
pub fn freshness_scan(engine: &Engine, stale_days: Option<i64>) -> Result<Vec<StaleMemory>> {
    let threshold = stale_days.unwrap_or(engine.config.importance.stale_threshold_days);
    let now = Utc::now();

    let mut stale = Vec::new();
    for memory in engine.store.list_full(&ListFilter::default())? {
        let days = memory.days_since_reinforced(now);
        if days <= threshold {
            continue;
        }
        let meta = &memory.meta;
        let category = if meta.importance >= 0.5 {
            FreshnessCategory::RefreshCandidate
        } else {
            FreshnessCategory::ArchiveCandidate
        };
        stale.push(StaleMemory {
            id: meta.id.clone(),
            project: meta.project.clone(),
            days_stale: days,
            importance: meta.importance,
            staleness_score: (days as f64 / 30.0) * (1.0 - meta.importance),
            category,
            preview: preview(&memory.content),
        });
    }

    stale.sort_by(|a, b| {
        b.staleness_score
            .partial_cmp(&a.staleness_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(stale)
}

/// Human-readable summary for the notification channel.
pub fn freshness_summary(stale: &[StaleMemory], max_items: usize) -> String {
    if stale.is_empty() {
        return "All memories are fresh. Nothing to review.".into();
    }
    let mut lines = vec![format!("{} memories need freshness review:", stale.len())];
    for s in stale.iter().take(max_items) {
        lines.push(format!(
            "  {}d · {} · {:.1} · {}",
            s.days_stale, s.project, s.importance, s.preview
        ));
    }
    if stale.len() > max_items {
        lines.push(format!("  …and {} more", stale.len() - max_items));
    }
    lines.join("\n")
}

/// Weekly job: freshness scan + summary event + promotion sweep.
pub fn run_weekly(engine: &Engine, dry_run: bool) -> Result<(Vec<StaleMemory>, promotion::PromotionOutcome)> {
    let stale = freshness_scan(engine, None)?;

    let promoted = if dry_run {
        promotion::PromotionOutcome {
            checked: 0,
            promoted: Vec::new(),
        }
    } else {
        let outcome = promotion::promotion_sweep(engine)?;
        events::emit(
            &engine.intel,
            "freshness_review",
            None,
            serde_json::json!({
                "stale": stale.len(),
                "refresh_candidates": stale.iter()
                    .filter(|s| s.category == FreshnessCategory::RefreshCandidate).count(),
                "archive_candidates": stale.iter()
                    .filter(|s| s.category == FreshnessCategory::ArchiveCandidate).count(),
                "promoted": outcome.promoted.len(),
                "summary": freshness_summary(&stale, 5),
            }),
        );
        set_marker(engine, "last_freshness_review", &Utc::now().to_rfc3339())?;
        outcome
    };

    Ok((stale, promoted))
}

fn preview(content: &str) -> String {
    let line = content.replace('\n', " ");
    let mut end = line.len().min(60);
    while end > 0 && !line.is_char_boundary(end) {
        end -= 1;
    }
    line[..end].trim().to_string()
}

// ── Run markers ──────────────────────────────────────────────────────────

fn get_marker(engine: &Engine, key: &str) -> Result<Option<String>> {
    let value = engine
        .intel
        .query_row(
            "SELECT value FROM schema_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

fn set_marker(engine: &Engine, key: &str, value: &str) -> Result<()> {
    engine.intel.execute(
        "INSERT INTO schema_meta (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_support::test_engine;
    use crate::store::types::{MemoryDraft, Scope};
    use chrono::Duration;

    fn seeded(engine: &Engine, content: &str, importance: f64) -> String {
        engine
            .remember(MemoryDraft {
                content: content.into(),
                scope: Scope::Project,
                project: "alpha".into(),
                tags: vec![],
                importance: Some(importance),
                source_session: None,
            })
            .unwrap()
            .meta
            .id
    }

    /// Rewrite a memory's last_reinforced to `days` ago, via the file.
    fn backdate(engine: &Engine, id: &str, days: i64) {
        let mut memory = engine.store.read(id).unwrap();
        memory.meta.last_reinforced = Utc::now() - Duration::days(days);
        memory.meta.created = Utc::now() - Duration::days(days);
        let raw = crate::store::frontmatter::render(&memory.meta, &memory.content).unwrap();
        std::fs::write(engine.store.root().join(format!("{id}.md")), raw).unwrap();
        crate::index::index_memory(&engine.intel, &memory).unwrap();
    }

    #[test]
    fn decay_and_archive_stale_low_importance() {
        let (_dir, engine) = test_engine();
        let id = seeded(&engine, "Old fading memory of a workaround", 0.3);
        backdate(&engine, &id, 200);

        let report = run_daily(&engine, false).unwrap();
        assert_eq!(report.decayed, 1);
        assert_eq!(report.archived, vec![id.clone()]);

        let memory = engine
            .store
            .read(&id)
            .unwrap();
        // 0.3 × 0.99^200 ≈ 0.040
        assert!((memory.meta.importance - 0.3 * 0.99f64.powi(200)).abs() < 1e-9);
        assert!(memory.meta.archived);
        assert_eq!(memory.meta.archive_reason.as_deref(), Some("decayed"));
    }

    #[test]
    fn aging_high_importance_memories_survive() {
        let (_dir, engine) = test_engine();
        let fresh = seeded(&engine, "Fresh important insight", 0.9);
        let aging = seeded(&engine, "Aging but important knowledge", 0.9);
        // Well decayed, but inside the staleness window
        backdate(&engine, &aging, 100);

        let report = run_daily(&engine, false).unwrap();
        assert!(report.archived.is_empty());
        assert!(!engine.store.read(&fresh).unwrap().meta.archived);
        let decayed = engine.store.read(&aging).unwrap();
        assert!(!decayed.meta.archived);
        // 0.9 × 0.99^100 ≈ 0.33 — decayed yet above the archive floor
        assert!(decayed.meta.importance < 0.9);
        assert!(decayed.meta.importance > 0.2);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let (_dir, engine) = test_engine();
        let id = seeded(&engine, "Dry run subject memory", 0.3);
        backdate(&engine, &id, 200);

        let report = run_daily(&engine, true).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.decayed, 1);
        assert_eq!(report.archived.len(), 1);

        // Nothing actually changed
        let memory = engine.store.read(&id).unwrap();
        assert_eq!(memory.meta.importance, 0.3);
        assert!(!memory.meta.archived);
    }

    #[test]
    fn second_run_same_day_is_a_no_op() {
        let (_dir, engine) = test_engine();
        let id = seeded(&engine, "Idempotence subject memory", 0.8);
        backdate(&engine, &id, 30);

        run_daily(&engine, false).unwrap();
        let after_first = engine.store.read(&id).unwrap().meta.importance;

        let second = run_daily(&engine, false).unwrap();
        assert_eq!(second.decayed, 0);
        let after_second = engine.store.read(&id).unwrap().meta.importance;
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn health_counts_and_quarantines_corrupt_files() {
        let (_dir, engine) = test_engine();
        seeded(&engine, "A healthy memory", 0.6);
        std::fs::write(engine.store.root().join("123-bad.md"), "garbage").unwrap();

        let dry = run_daily(&engine, true).unwrap();
        assert_eq!(dry.health.corrupt_files, 1);
        assert_eq!(dry.health.quarantined, 0);

        let wet = run_daily(&engine, false).unwrap();
        assert_eq!(wet.health.quarantined, 1);
        assert!(engine.store.root().join("quarantine").exists());
    }

    #[test]
    fn stats_snapshot_aggregates() {
        let (_dir, engine) = test_engine();
        seeded(&engine, "High value fact", 0.9);
        seeded(&engine, "Low value note", 0.4);

        let report = run_daily(&engine, true).unwrap();
        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.high_importance, 1);
        assert!((report.stats.avg_importance - 0.65).abs() < 1e-9);
        assert_eq!(report.stats.per_project["alpha"], 2);
    }

    #[test]
    fn freshness_scan_categorizes_and_orders() {
        let (_dir, engine) = test_engine();
        let keep = seeded(&engine, "Still matters a lot", 0.8);
        let drop = seeded(&engine, "Barely mattered then", 0.2);
        backdate(&engine, &keep, 200);
        backdate(&engine, &drop, 250);
        seeded(&engine, "Fresh memory stays out", 0.5);

        let stale = freshness_scan(&engine, None).unwrap();
        assert_eq!(stale.len(), 2);
        // Less important + older sorts first
        assert_eq!(stale[0].id, drop);
        assert_eq!(stale[0].category, FreshnessCategory::ArchiveCandidate);
        assert_eq!(stale[1].id, keep);
        assert_eq!(stale[1].category, FreshnessCategory::RefreshCandidate);

        let summary = freshness_summary(&stale, 5);
        assert!(summary.contains("2 memories need freshness review"));
    }

    #[test]
    fn weekly_review_emits_summary_event() {
        let (_dir, engine) = test_engine();
        let id = seeded(&engine, "Stale weekly subject", 0.3);
        backdate(&engine, &id, 200);

        let (stale, _promoted) = run_weekly(&engine, false).unwrap();
        assert_eq!(stale.len(), 1);

        let recent = events::recent(&engine.intel, 5).unwrap();
        assert!(recent.iter().any(|(kind, _, _)| kind == "freshness_review"));
    }
}
