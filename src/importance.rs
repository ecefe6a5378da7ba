//! Importance scoring — base classification, decay, reinforcement.
//!
//! Base scores come from a weighted trigger taxonomy (urgency, pattern,
//! impact, and learning markers), then drift: daily decay of `0.99^days`
//! unless reinforced, reinforcement of `×1.15` capped at 0.95. The cap
//! leaves headroom above typical autosaved memories.

use crate::config::ImportanceConfig;

/// Keywords that mark a memory as worth boosting, with their weights.
const IMPORTANCE_SIGNALS: &[(&str, f64)] = &[
    ("critical", 0.3),
    ("urgent", 0.25),
    ("breaking", 0.25),
    ("production", 0.2),
    ("pattern", 0.15),
    ("mistake", 0.15),
    ("failed", 0.15),
    ("across", 0.1),
    ("clients", 0.1),
    ("success", 0.1),
];

/// Trigger words detected for tagging and boost.
const TRIGGER_WORDS: &[&str] = &[
    // Urgency
    "critical", "urgent", "breaking", "production", "broken", "failed",
    // Patterns
    "pattern", "across", "multiple", "clients", "projects", "universal",
    // Impact
    "mistake", "error", "failure", "success", "win", "breakthrough",
    // Learning markers
    "learned", "discovered", "realized", "insight", "revelation",
];

/// Base importance from content signals, clamped to `[0.3, 1.0]`.
///
/// Baseline 0.5, plus keyword weights, a length bonus for substantial
/// content, emphasis markers (exclamations, ALL-CAPS words), a bonus for
/// multi-sentence structure, and a capped boost per detected trigger word.
pub fn classify(content: &str) -> f64 {
    if content.is_empty() {
        return 0.3;
    }

    let mut score = 0.5;
    let lower = content.to_lowercase();

    for (keyword, weight) in IMPORTANCE_SIGNALS {
        if lower.contains(keyword) {
            score += weight;
        }
    }

    let word_count = content.split_whitespace().count();
    if word_count > 50 {
        score += 0.1;
    }

    if content.contains('!') {
        score += 0.05;
    }
    let caps_words = content
        .split_whitespace()
        .filter(|w| w.len() > 2 && w.chars().all(|c| c.is_ascii_uppercase()))
        .count();
    if caps_words > 0 {
        score += (caps_words as f64 * 0.05).min(0.1);
    }

    let sentence_count = content.matches(['.', '!', '?']).count();
    if sentence_count > 2 {
        score += 0.05;
    }

    let score = score.clamp(0.3, 1.0);

    // Trigger words boost on top of the signal weights: 5% each, 20% cap.
    let boost = (detect_triggers(content).len() as f64 * 0.05).min(0.2);
    (score + boost).min(1.0)
}

/// Detect trigger words present in the content (lowercased, deduplicated,
/// whole-word matches).
pub fn detect_triggers(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let words: std::collections::HashSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    TRIGGER_WORDS
        .iter()
        .filter(|t| words.contains(**t))
        .map(|t| t.to_string())
        .collect()
}

/// Decay: `importance × rate^days`. Never negative.
pub fn decay(importance: f64, days_since: i64, rate: f64) -> f64 {
    let days = days_since.max(0);
    (importance * rate.powi(days as i32)).max(0.0)
}

/// Reinforcement: `importance × factor`, capped.
pub fn reinforce(importance: f64, factor: f64, cap: f64) -> f64 {
    (importance * factor).min(cap)
}

/// Whether a memory is eligible for archival: importance below the
/// threshold AND stale past the configured window.
pub fn archivable(importance: f64, days_since_reinforced: i64, config: &ImportanceConfig) -> bool {
    importance < config.archive_threshold && days_since_reinforced > config.stale_threshold_days
}
