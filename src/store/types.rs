//! Core memory type definitions.
//!
//! Defines [`Scope`] (project-local vs global visibility), [`Frontmatter`]
//! (the structured fields carried in each file's YAML header), [`Memory`]
//! (a fully materialized record), and the filter/patch types used by the
//! store API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngramError, Result};

/// Visibility scope for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible only within the owning project.
    Project,
    /// Promoted, cross-project knowledge.
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "project" => Ok(Self::Project),
            "global" => Ok(Self::Global),
            _ => Err(EngramError::InvalidInput(format!("unknown scope: {s}"))),
        }
    }
}

/// Structured fields carried in the YAML frontmatter of a memory file.
///
/// The markdown file is the source of truth; everything in the sidecar
/// databases derives from these fields plus the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frontmatter {
    /// `<epoch-ms>-<short-content-hash>`, unique and immutable.
    pub id: String,
    pub scope: Scope,
    pub project: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Clamped to `[0.0, 1.0]`.
    pub importance: f64,
    pub created: DateTime<Utc>,
    pub last_reinforced: DateTime<Utc>,
    #[serde(default)]
    pub reinforcement_count: u32,
    #[serde(default = "unknown_session")]
    pub source_session: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
}

fn unknown_session() -> String {
    "unknown".into()
}

/// A fully materialized memory record: frontmatter plus body content.
#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    #[serde(flatten)]
    pub meta: Frontmatter,
    pub content: String,
}

impl Memory {
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Days elapsed since the last reinforcement, floored at zero.
    pub fn days_since_reinforced(&self, now: DateTime<Utc>) -> i64 {
        (now - self.meta.last_reinforced).num_days().max(0)
    }

    /// Days elapsed since creation, floored at zero.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.meta.created).num_days().max(0)
    }
}

/// Fields a new memory is created from. The store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct MemoryDraft {
    pub content: String,
    pub scope: Scope,
    pub project: String,
    pub tags: Vec<String>,
    /// `None` lets the importance engine classify the content.
    pub importance: Option<f64>,
    pub source_session: Option<String>,
}

/// A partial update applied by [`MemoryStore::update`](super::MemoryStore::update).
///
/// `None` fields are left untouched. Content edits snapshot the previous
/// file into the versions area before rewriting.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub importance: Option<f64>,
    pub scope: Option<Scope>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub superseded_by: Option<String>,
}

/// Filters for [`MemoryStore::list`](super::MemoryStore::list). Archived
/// memories are excluded unless `include_archived` is set.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub project: Option<String>,
    pub scope: Option<Scope>,
    pub tag: Option<String>,
    pub min_importance: Option<f64>,
    pub include_archived: bool,
}

impl ListFilter {
    pub fn matches(&self, meta: &Frontmatter) -> bool {
        if meta.archived && !self.include_archived {
            return false;
        }
        if let Some(ref project) = self.project {
            if &meta.project != project {
                return false;
            }
        }
        if let Some(scope) = self.scope {
            if meta.scope != scope {
                return false;
            }
        }
        if let Some(ref tag) = self.tag {
            if !meta.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(min) = self.min_importance {
            if meta.importance < min {
                return false;
            }
        }
        true
    }
}

/// A prior version of a memory, captured on explicit edits.
#[derive(Debug, Clone)]
pub struct MemoryVersion {
    pub saved_at: DateTime<Utc>,
    pub path: std::path::PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn meta(project: &str, scope: Scope, importance: f64, archived: bool) -> Frontmatter {
        Frontmatter {
            id: "1700000000000-abcd1234".into(),
            scope,
            project: project.into(),
            tags: vec!["learning".into()],
            importance,
            created: Utc::now(),
            last_reinforced: Utc::now(),
            reinforcement_count: 1,
            source_session: "unknown".into(),
            archived,
            archive_reason: None,
            promoted_at: None,
            superseded_by: None,
        }
    }

    #[test]
    fn scope_round_trips() {
        assert_eq!(Scope::from_str("project").unwrap(), Scope::Project);
        assert_eq!(Scope::from_str("global").unwrap(), Scope::Global);
        assert!(Scope::from_str("group").is_err());
        assert_eq!(Scope::Global.to_string(), "global");
    }

    #[test]
    fn filter_excludes_archived_by_default() {
        let filter = ListFilter::default();
        assert!(filter.matches(&meta("p1", Scope::Project, 0.5, false)));
        assert!(!filter.matches(&meta("p1", Scope::Project, 0.5, true)));

        let include = ListFilter {
            include_archived: true,
            ..Default::default()
        };
        assert!(include.matches(&meta("p1", Scope::Project, 0.5, true)));
    }

    #[test]
    fn filter_by_project_scope_tag_importance() {
        let filter = ListFilter {
            project: Some("p1".into()),
            scope: Some(Scope::Project),
            tag: Some("learning".into()),
            min_importance: Some(0.4),
            include_archived: false,
        };
        assert!(filter.matches(&meta("p1", Scope::Project, 0.5, false)));
        assert!(!filter.matches(&meta("p2", Scope::Project, 0.5, false)));
        assert!(!filter.matches(&meta("p1", Scope::Global, 0.5, false)));
        assert!(!filter.matches(&meta("p1", Scope::Project, 0.3, false)));
    }
}
