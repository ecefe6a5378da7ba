//! FSRS-inspired spaced-repetition scheduler.
//!
//! Each memory carries difficulty D ∈ [1,10] and stability S > 0. Grades
//! scale stability (FAIL 0.5, HARD 0.8, GOOD 1.5, EASY 2.2) and drift
//! difficulty toward the grade's mean. The state update and the
//! review-history append share one transaction; history is append-only and
//! strictly increasing in time per memory.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::error::{EngramError, Result};

/// Review grade. GOOD is a same-project reconfirmation, EASY cross-project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Grade {
    Fail,
    Hard,
    Good,
    Easy,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "FAIL",
            Self::Hard => "HARD",
            Self::Good => "GOOD",
            Self::Easy => "EASY",
        }
    }

    /// Stability multiplier.
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Fail => 0.5,
            Self::Hard => 0.8,
            Self::Good => 1.5,
            Self::Easy => 2.2,
        }
    }

    /// Difficulty drift applied per review, clamped into [1, 10].
    pub fn difficulty_drift(&self) -> f64 {
        match self {
            Self::Fail => 1.0,
            Self::Hard => 0.5,
            Self::Good => -0.25,
            Self::Easy => -0.5,
        }
    }
}

impl std::str::FromStr for Grade {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "FAIL" => Ok(Self::Fail),
            "HARD" => Ok(Self::Hard),
            "GOOD" => Ok(Self::Good),
            "EASY" => Ok(Self::Easy),
            _ => Err(EngramError::InvalidInput(format!(
                "unknown grade: {s} (expected FAIL|HARD|GOOD|EASY)"
            ))),
        }
    }
}

/// Cold-start difficulty for a memory first graded without prior state.
const INITIAL_DIFFICULTY: f64 = 5.0;
/// Cold-start stability in days.
const INITIAL_STABILITY: f64 = 1.0;
const MIN_STABILITY: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct FsrsState {
    pub memory_id: String,
    pub difficulty: f64,
    pub stability: f64,
    pub last_reviewed: DateTime<Utc>,
    pub next_due: DateTime<Utc>,
    pub review_count: u32,
    pub validated_projects: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub state: FsrsState,
    pub grade: Grade,
    pub prev_interval_days: i64,
    pub new_interval_days: i64,
}

/// A memory due for review, ordered by priority.
#[derive(Debug, Clone, Serialize)]
pub struct DueReview {
    pub memory_id: String,
    pub next_due: DateTime<Utc>,
    pub days_overdue: i64,
    pub importance: f64,
    pub priority: f64,
}

/// Fetch a memory's scheduler state.
pub fn get_state(conn: &Connection, memory_id: &str) -> Result<Option<FsrsState>> {
    let row = conn
        .query_row(
            "SELECT memory_id, difficulty, stability, last_reviewed, next_due, review_count, \
             validated_projects FROM fsrs_state WHERE memory_id = ?1",
            params![memory_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((memory_id, difficulty, stability, last_reviewed, next_due, review_count, projects)) =
        row
    else {
        return Ok(None);
    };

    Ok(Some(FsrsState {
        memory_id,
        difficulty,
        stability,
        last_reviewed: parse_time(&last_reviewed)?,
        next_due: parse_time(&next_due)?,
        review_count,
        validated_projects: serde_json::from_str(&projects)?,
    }))
}

/// Record a review. Cold-starts absent state at D=5.0, S=1.0 before the
/// grade applies; intervals floor at one day. When `project` is new to the
/// memory it joins the validated set (the promotion gate counts these).
pub fn record_review(
    conn: &mut Connection,
    memory_id: &str,
    grade: Grade,
    project: Option<&str>,
) -> Result<ReviewOutcome> {
    record_review_at(conn, memory_id, grade, project, Utc::now())
}

pub(crate) fn record_review_at(
    conn: &mut Connection,
    memory_id: &str,
    grade: Grade,
    project: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ReviewOutcome> {
    let prior = get_state(conn, memory_id)?;

    let (d_before, s_before, prev_interval, mut validated, review_count) = match prior {
        Some(state) => {
            let prev_interval = (state.next_due - state.last_reviewed).num_days().max(0);
            (
                state.difficulty,
                state.stability,
                prev_interval,
                state.validated_projects,
                state.review_count,
            )
        }
        None => (INITIAL_DIFFICULTY, INITIAL_STABILITY, 0, Vec::new(), 0),
    };

    let s_after = (s_before * grade.multiplier()).max(MIN_STABILITY);
    let d_after = (d_before + grade.difficulty_drift()).clamp(1.0, 10.0);
    let new_interval = (s_after.round() as i64).max(1);
    let next_due = now + Duration::days(new_interval);

    if let Some(project) = project {
        if !validated.iter().any(|p| p == project) {
            validated.push(project.to_string());
        }
    }

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO fsrs_state \
           (memory_id, difficulty, stability, last_reviewed, next_due, review_count, validated_projects) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT(memory_id) DO UPDATE SET \
           difficulty = excluded.difficulty, \
           stability = excluded.stability, \
           last_reviewed = excluded.last_reviewed, \
           next_due = excluded.next_due, \
           review_count = excluded.review_count, \
           validated_projects = excluded.validated_projects",
        params![
            memory_id,
            d_after,
            s_after,
            now.to_rfc3339(),
            next_due.to_rfc3339(),
            review_count + 1,
            serde_json::to_string(&validated)?,
        ],
    )?;
    tx.execute(
        "INSERT INTO review_history \
           (memory_id, reviewed_at, grade, stability_before, stability_after, \
            difficulty_before, difficulty_after, prev_interval_days, new_interval_days) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            memory_id,
            now.to_rfc3339(),
            grade.as_str(),
            s_before,
            s_after,
            d_before,
            d_after,
            prev_interval,
            new_interval,
        ],
    )?;
    tx.commit()?;

    Ok(ReviewOutcome {
        state: FsrsState {
            memory_id: memory_id.to_string(),
            difficulty: d_after,
            stability: s_after,
            last_reviewed: now,
            next_due,
            review_count: review_count + 1,
            validated_projects: validated,
        },
        grade,
        prev_interval_days: prev_interval,
        new_interval_days: new_interval,
    })
}

/// Memories due for review, ordered by
/// `priority = max(0, days_overdue) × 2 + importance × 100` descending.
///
/// Importance and project come from the intelligence index; archived
/// memories are skipped.
pub fn due_reviews(
    fsrs: &Connection,
    intel: &Connection,
    limit: usize,
    project: Option<&str>,
) -> Result<Vec<DueReview>> {
    let now = Utc::now();
    let mut stmt = fsrs.prepare(
        "SELECT memory_id, next_due FROM fsrs_state WHERE next_due <= ?1",
    )?;
    let due_rows = stmt
        .query_map(params![now.to_rfc3339()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut reviews = Vec::new();
    for (memory_id, next_due) in due_rows {
        let row: Option<(f64, String, i64)> = intel
            .query_row(
                "SELECT importance, project, archived FROM memory_index WHERE id = ?1",
                params![memory_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((importance, memory_project, archived)) = row else {
            continue;
        };
        if archived != 0 {
            continue;
        }
        if let Some(project) = project {
            if memory_project != project {
                continue;
            }
        }

        let next_due = parse_time(&next_due)?;
        let days_overdue = (now - next_due).num_days().max(0);
        reviews.push(DueReview {
            memory_id,
            next_due,
            days_overdue,
            importance,
            priority: days_overdue as f64 * 2.0 + importance * 100.0,
        });
    }

    reviews.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    reviews.truncate(limit);
    Ok(reviews)
}

/// Full review history for a memory, oldest first.
pub fn history(conn: &Connection, memory_id: &str) -> Result<Vec<(DateTime<Utc>, String, f64, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT reviewed_at, grade, stability_before, stability_after \
         FROM review_history WHERE memory_id = ?1 ORDER BY reviewed_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![memory_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(at, grade, before, after)| Ok((parse_time(&at)?, grade, before, after)))
        .collect()
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .map_err(|e| EngramError::InvalidInput(format!("bad timestamp '{s}': {e}")))
}
