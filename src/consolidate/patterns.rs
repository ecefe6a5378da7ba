//! Pattern-based extraction — fast, deterministic, no provider costs.
//!
//! Four regex families scan the normalized conversation: explicit learning
//! statements, user corrections (the strongest signal, boosted), problem/
//! solution pairs, and assistant insights marked by reasoning indicators.

use std::sync::OnceLock;

use regex::Regex;

use crate::importance;

/// Which extraction family produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Learning,
    Correction,
    ProblemSolution,
    Insight,
    Llm,
}

impl Family {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Learning => "learning",
            Self::Correction => "correction",
            Self::ProblemSolution => "problem-solution",
            Self::Insight => "insight",
            Self::Llm => "llm-extracted",
        }
    }
}

/// A memory candidate awaiting dedup and persistence.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub content: String,
    pub importance: f64,
    pub family: Family,
}

impl Candidate {
    /// Tags: family tag plus any detected trigger words.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![self.family.tag().to_string()];
        for trigger in importance::detect_triggers(&self.content) {
            if !tags.contains(&trigger) {
                tags.push(trigger);
            }
        }
        tags
    }
}

/// Family base importances. Extraction takes the max of the family base
/// and the content classification, so signal-heavy phrasing still raises
/// the score. Corrections sit highest.
const LEARNING_BASE: f64 = 0.65;
const CORRECTION_BASE: f64 = 0.8;
const PROBLEM_SOLUTION_BASE: f64 = 0.7;
const INSIGHT_BASE: f64 = 0.55;

fn learning_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            Regex::new(
                r"(?i)(?:learned|discovered|realized|found out|noticed) (?:that )?([^.!?]+[.!?])",
            )
            .unwrap(),
            Regex::new(r"(?i)(?:key insight|important to note|worth remembering):? ([^.!?]+[.!?])")
                .unwrap(),
            Regex::new(r"(?i)(?:pattern|trend) (?:i noticed|observed|saw):? ([^.!?]+[.!?])").unwrap(),
        ]
    })
}

fn correction_res() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            Regex::new(
                r"(?is)user:.*?(?:actually|correction|no,|wrong|mistake|should be|meant to say) ([^.!?]+[.!?])",
            )
            .unwrap(),
            Regex::new(r"(?is)user:.*?(?:better way|instead try|prefer) ([^.!?]+[.!?])").unwrap(),
        ]
    })
}

fn problem_solution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)(?:problem|issue|challenge):.*?([^.!?]+[.!?]).*?(?:solution|fix|approach):.*?([^.!?]+[.!?])",
        )
        .unwrap()
    })
}

fn insight_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)assistant:.*?([A-Z][^.!?]{30,}[.!?])").unwrap())
}

/// Phrases that mark an assistant sentence as conversational filler.
const TRIVIAL_PHRASES: &[&str] = &["let me", "i'll", "here's", "sure", "okay", "got it"];

/// Indicators that an assistant sentence carries a transferable lesson.
const INSIGHT_INDICATORS: &[&str] = &[
    "better to", "key is", "important", "pattern", "approach", "when you", "if you",
    "works well", "effective", "i've found", "rather than", "instead of", "acknowledge",
    "reframe", "ask", "often hide", "surface", "recommend",
];

/// Cap on assistant insights per session — the top few carry the value.
const MAX_INSIGHTS: usize = 3;

/// Run all four families over a normalized conversation.
pub fn extract(conversation: &str) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    extract_learnings(conversation, &mut candidates);
    extract_corrections(conversation, &mut candidates);
    extract_problem_solutions(conversation, &mut candidates);
    extract_insights(conversation, &mut candidates);
    candidates
}

fn extract_learnings(conversation: &str, out: &mut Vec<Candidate>) {
    for re in learning_res() {
        for capture in re.captures_iter(conversation) {
            let content = capture[1].trim().to_string();
            if content.len() <= 20 {
                continue;
            }
            let score = importance::classify(&content).max(LEARNING_BASE);
            out.push(Candidate {
                content,
                importance: score,
                family: Family::Learning,
            });
        }
    }
}

fn extract_corrections(conversation: &str, out: &mut Vec<Candidate>) {
    for re in correction_res() {
        for capture in re.captures_iter(conversation) {
            let body = capture[1].trim().to_string();
            if body.len() <= 15 {
                continue;
            }
            // Corrections are the strongest learning signal.
            let boosted = (importance::classify(&body) * 1.2)
                .max(CORRECTION_BASE)
                .min(0.95);
            out.push(Candidate {
                content: format!("Correction: {body}"),
                importance: boosted,
                family: Family::Correction,
            });
        }
    }
}

fn extract_problem_solutions(conversation: &str, out: &mut Vec<Candidate>) {
    for capture in problem_solution_re().captures_iter(conversation) {
        let problem = capture[1].trim().to_string();
        let solution = capture[2].trim().to_string();
        if problem.len() <= 10 || solution.len() <= 10 {
            continue;
        }
        let content = format!("Problem: {problem} Solution: {solution}");
        let score = importance::classify(&content).max(PROBLEM_SOLUTION_BASE);
        out.push(Candidate {
            content,
            importance: score,
            family: Family::ProblemSolution,
        });
    }
}

fn extract_insights(conversation: &str, out: &mut Vec<Candidate>) {
    let mut count = 0;
    for capture in insight_re().captures_iter(conversation) {
        if count >= MAX_INSIGHTS {
            break;
        }
        let insight = capture[1].trim().to_string();
        let lower = insight.to_lowercase();

        if TRIVIAL_PHRASES.iter().any(|p| lower.contains(p)) {
            continue;
        }
        if !INSIGHT_INDICATORS.iter().any(|i| lower.contains(i)) {
            continue;
        }

        let score = importance::classify(&insight).max(INSIGHT_BASE);
        out.push(Candidate {
            content: insight,
            importance: score,
            family: Family::Insight,
        });
        count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learning_statement_is_extracted() {
        let conversation = "user: I learned that direct language works better with clients.";
        let candidates = extract(conversation);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].family, Family::Learning);
        assert!(candidates[0].content.starts_with("direct language"));
        assert!(candidates[0].importance >= 0.5);
        assert!(candidates[0].tags().contains(&"learning".to_string()));
    }

    #[test]
    fn short_learnings_are_skipped() {
        let conversation = "user: I learned that x works.";
        assert!(extract(conversation).is_empty());
    }

    #[test]
    fn corrections_are_boosted_and_prefixed() {
        let conversation =
            "user: actually the staging environment uses the old schema version still.";
        let candidates = extract(conversation);
        let correction = candidates
            .iter()
            .find(|c| c.family == Family::Correction)
            .expect("correction extracted");
        assert!(correction.content.starts_with("Correction: "));
        assert!(correction.importance <= 0.95);

        // Boost over the unprefixed classification
        let base = crate::importance::classify("the staging environment uses the old schema version still.");
        assert!(correction.importance >= base);
    }

    #[test]
    fn problem_solution_pairs_combine() {
        let conversation = "assistant: Problem: the import job deadlocks nightly under load. \
                            Solution: batch the writes and retry with backoff.";
        let candidates = extract(conversation);
        let ps = candidates
            .iter()
            .find(|c| c.family == Family::ProblemSolution)
            .expect("pair extracted");
        assert!(ps.content.starts_with("Problem: "));
        assert!(ps.content.contains("Solution: "));
    }

    #[test]
    fn insights_require_indicators_and_skip_filler() {
        let filler = "assistant: Sure, let me take a look at that file for you right away.";
        assert!(extract(filler).is_empty());

        let insight = "assistant: The key is to acknowledge the concern before offering any alternatives in negotiations.";
        let candidates = extract(insight);
        assert!(candidates.iter().any(|c| c.family == Family::Insight));
    }

    #[test]
    fn insights_are_capped_per_session() {
        let mut conversation = String::new();
        for i in 0..6 {
            conversation.push_str(&format!(
                "assistant: The key is to always measure the number {i} case before optimizing anything at all.\n\n"
            ));
        }
        let insights: Vec<_> = extract(&conversation)
            .into_iter()
            .filter(|c| c.family == Family::Insight)
            .collect();
        assert!(insights.len() <= MAX_INSIGHTS);
    }

    #[test]
    fn trigger_words_become_tags() {
        let conversation =
            "user: I learned that the production deploy failed because of a missing migration.";
        let candidates = extract(conversation);
        let tags = candidates[0].tags();
        assert!(tags.contains(&"learning".to_string()));
        assert!(tags.contains(&"production".to_string()));
        assert!(tags.contains(&"failed".to_string()));
    }
}
