//! Relationship / contradiction graph.
//!
//! Directed, typed edges between memories: causal, contradicts, supports,
//! requires, related. The (from, to, type) triple is unique; self-edges and
//! cycles are legal, so traversals carry explicit visited sets. Edges come
//! from manual `relate` calls, the consolidator's session links, and the
//! LLM contradiction detector (behind its own breaker).

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::breaker::BreakerRegistry;
use crate::consolidate::llm::LlmExtractor;
use crate::error::{EngramError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causal,
    Contradicts,
    Supports,
    Requires,
    Related,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Contradicts => "contradicts",
            Self::Supports => "supports",
            Self::Requires => "requires",
            Self::Related => "related",
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = EngramError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "causal" => Ok(Self::Causal),
            "contradicts" => Ok(Self::Contradicts),
            "supports" => Ok(Self::Supports),
            "requires" => Ok(Self::Requires),
            "related" => Ok(Self::Related),
            _ => Err(EngramError::InvalidInput(format!(
                "unknown relationship type: {s} \
                 (expected causal|contradicts|supports|requires|related)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    pub id: String,
    pub from_memory_id: String,
    pub to_memory_id: String,
    pub relationship_type: RelationType,
    pub strength: f64,
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

/// Create (or return the existing) edge for a (from, to, type) triple.
///
/// The edge id is derived from the triple, so re-linking is idempotent.
pub fn link(
    conn: &Connection,
    from_id: &str,
    to_id: &str,
    relationship_type: RelationType,
    strength: f64,
    evidence: Option<&str>,
    created_by: &str,
) -> Result<String> {
    if !(0.0..=1.0).contains(&strength) {
        return Err(EngramError::InvalidInput(format!(
            "strength must be in [0, 1], got {strength}"
        )));
    }

    let edge_id = edge_id(from_id, to_id, relationship_type);
    conn.execute(
        "INSERT OR IGNORE INTO memory_relationships \
           (id, from_memory_id, to_memory_id, relationship_type, strength, evidence, created_at, created_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            edge_id,
            from_id,
            to_id,
            relationship_type.as_str(),
            strength,
            evidence,
            Utc::now().to_rfc3339(),
            created_by,
        ],
    )?;
    Ok(edge_id)
}

/// Edges touching `memory_id`, strongest first. Returns the other endpoint
/// alongside each edge.
pub fn related(
    conn: &Connection,
    memory_id: &str,
    relationship_type: Option<RelationType>,
    direction: Direction,
    min_strength: f64,
) -> Result<Vec<(String, Relationship)>> {
    let direction_sql = match direction {
        Direction::Outgoing => "from_memory_id = ?1",
        Direction::Incoming => "to_memory_id = ?1",
        Direction::Both => "(from_memory_id = ?1 OR to_memory_id = ?1)",
    };
    let mut sql = format!(
        "SELECT id, from_memory_id, to_memory_id, relationship_type, strength, evidence, \
         created_at, created_by FROM memory_relationships \
         WHERE {direction_sql} AND strength >= ?2"
    );
    if relationship_type.is_some() {
        sql.push_str(" AND relationship_type = ?3");
    }
    sql.push_str(" ORDER BY strength DESC, created_at DESC");

    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Relationship> {
        let type_str: String = row.get(3)?;
        let created_at: String = row.get(6)?;
        Ok(Relationship {
            id: row.get(0)?,
            from_memory_id: row.get(1)?,
            to_memory_id: row.get(2)?,
            relationship_type: type_str.parse().unwrap_or(RelationType::Related),
            strength: row.get(4)?,
            evidence: row.get(5)?,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            created_by: row.get(7)?,
        })
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = match relationship_type {
        Some(t) => stmt
            .query_map(params![memory_id, min_strength, t.as_str()], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        None => stmt
            .query_map(params![memory_id, min_strength], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };

    Ok(rows
        .into_iter()
        .map(|rel| {
            let other = if rel.from_memory_id == memory_id {
                rel.to_memory_id.clone()
            } else {
                rel.from_memory_id.clone()
            };
            (other, rel)
        })
        .collect())
}

/// Shortest causal chain from `start` to `end` via breadth-first search
/// over outgoing causal edges. The visited set makes cycles safe.
pub fn find_causal_chain(
    conn: &Connection,
    start_id: &str,
    end_id: &str,
    max_depth: usize,
) -> Result<Option<Vec<String>>> {
    let mut queue = VecDeque::new();
    let mut visited = HashSet::new();
    queue.push_back(vec![start_id.to_string()]);
    visited.insert(start_id.to_string());

    while let Some(path) = queue.pop_front() {
        let current = path.last().expect("paths are non-empty");
        if current == end_id {
            return Ok(Some(path));
        }
        if path.len() > max_depth {
            continue;
        }

        for (next, _) in related(conn, current, Some(RelationType::Causal), Direction::Outgoing, 0.0)? {
            if visited.insert(next.clone()) {
                let mut extended = path.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }
    }
    Ok(None)
}

/// Memories that contradict this one, in either direction.
pub fn detect_contradictions(
    conn: &Connection,
    memory_id: &str,
) -> Result<Vec<(String, Relationship)>> {
    related(conn, memory_id, Some(RelationType::Contradicts), Direction::Both, 0.0)
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
    pub average_strength: f64,
}

pub fn stats(conn: &Connection) -> Result<GraphStats> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM memory_relationships", [], |r| r.get(0))?;

    let mut by_type = HashMap::new();
    let mut stmt = conn.prepare(
        "SELECT relationship_type, COUNT(*) FROM memory_relationships GROUP BY relationship_type",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for (t, count) in rows {
        by_type.insert(t, count as usize);
    }

    let average_strength: f64 = conn
        .query_row("SELECT AVG(strength) FROM memory_relationships", [], |r| {
            r.get::<_, Option<f64>>(0)
        })?
        .unwrap_or(0.0);

    Ok(GraphStats {
        total: total as usize,
        by_type,
        average_strength,
    })
}

/// Out-degree and in-degree for one memory.
pub fn degree(conn: &Connection, memory_id: &str) -> Result<(usize, usize)> {
    let out: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_relationships WHERE from_memory_id = ?1",
        params![memory_id],
        |r| r.get(0),
    )?;
    let inbound: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_relationships WHERE to_memory_id = ?1",
        params![memory_id],
        |r| r.get(0),
    )?;
    Ok((out as usize, inbound as usize))
}

/// Ask the LLM whether two memories conflict; link a `contradicts` edge
/// when it says yes with confidence at or above the configured floor.
///
/// Runs behind the `contradiction_check` breaker: when the circuit is open
/// the check is skipped and `None` is returned.
pub fn llm_contradiction_check(
    conn: &Connection,
    breakers: &mut BreakerRegistry,
    extractor: &dyn LlmExtractor,
    from_id: &str,
    from_content: &str,
    to_id: &str,
    to_content: &str,
    min_confidence: f64,
) -> Result<Option<String>> {
    let prompt = format!(
        "Do these two statements contradict each other?\n\n\
         A: {from_content}\n\nB: {to_content}\n\n\
         Answer with JSON only: {{\"contradicts\": true|false, \"confidence\": 0.0-1.0}}"
    );

    let response = match breakers.call(conn, "contradiction_check", || extractor.extract(&prompt, "")) {
        Ok(text) => text,
        Err(EngramError::CircuitOpen { .. }) => return Ok(None),
        Err(e) => return Err(e),
    };

    let parsed: serde_json::Value = match serde_json::from_str(response.trim()) {
        Ok(v) => v,
        Err(_) => return Ok(None),
    };
    let contradicts = parsed["contradicts"].as_bool().unwrap_or(false);
    let confidence = parsed["confidence"].as_f64().unwrap_or(0.0);

    if contradicts && confidence >= min_confidence {
        let edge = link(
            conn,
            from_id,
            to_id,
            RelationType::Contradicts,
            confidence,
            Some("llm contradiction check"),
            "contradiction_detector",
        )?;
        return Ok(Some(edge));
    }
    Ok(None)
}

fn edge_id(from_id: &str, to_id: &str, relationship_type: RelationType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from_id.as_bytes());
    hasher.update(to_id.as_bytes());
    hasher.update(relationship_type.as_str().as_bytes());
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Does the exact edge already exist?
pub fn edge_exists(
    conn: &Connection,
    from_id: &str,
    to_id: &str,
    relationship_type: RelationType,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM memory_relationships \
             WHERE from_memory_id = ?1 AND to_memory_id = ?2 AND relationship_type = ?3",
            params![from_id, to_id, relationship_type.as_str()],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
