//! Async ingestion queue.
//!
//! The session-end hook enqueues (session, project, transcript path) and
//! returns immediately; a background consumer drains jobs with
//! at-least-once delivery, running the consolidator per job. Replays are
//! harmless — dedup absorbs them. Jobs stuck `running` past the lease are
//! re-queued on the next consumer pass (crash recovery).

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crate::consolidate::{self, ConsolidationResult};
use crate::engine::Engine;
use crate::error::Result;

#[derive(Debug, Clone, Serialize)]
pub struct QueueJob {
    pub id: String,
    pub session_id: String,
    pub project_id: String,
    pub transcript_path: String,
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Enqueue a consolidation job. Returns `None` when the soft capacity is
/// hit — session consolidation is best-effort, so the producer drops with
/// a warning rather than blocking the host.
pub fn enqueue(
    conn: &Connection,
    capacity: usize,
    session_id: &str,
    project_id: &str,
    transcript_path: &str,
) -> Result<Option<String>> {
    if pending_depth(conn)? >= capacity {
        warn!(session = session_id, capacity, "ingest queue full, dropping job");
        return Ok(None);
    }

    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO ingest_queue (id, session_id, project_id, transcript_path, status, attempts, enqueued_at) \
         VALUES (?1, ?2, ?3, ?4, 'queued', 0, ?5)",
        params![id, session_id, project_id, transcript_path, Utc::now().to_rfc3339()],
    )?;
    Ok(Some(id))
}

/// Number of jobs waiting to run.
pub fn pending_depth(conn: &Connection) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ingest_queue WHERE status = 'queued'",
        [],
        |r| r.get(0),
    )?;
    Ok(count as usize)
}

/// Claim the oldest queued job, marking it running.
pub fn claim_next(conn: &Connection) -> Result<Option<QueueJob>> {
    let row: Option<(String, String, String, String, u32, String)> = conn
        .query_row(
            "SELECT id, session_id, project_id, transcript_path, attempts, enqueued_at \
             FROM ingest_queue WHERE status = 'queued' \
             ORDER BY enqueued_at ASC LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, session_id, project_id, transcript_path, attempts, enqueued_at)) = row else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE ingest_queue SET status = 'running', attempts = attempts + 1, started_at = ?1 \
         WHERE id = ?2",
        params![Utc::now().to_rfc3339(), id],
    )?;

    Ok(Some(QueueJob {
        id,
        session_id,
        project_id,
        transcript_path,
        attempts: attempts + 1,
        enqueued_at: enqueued_at.parse().unwrap_or_else(|_| Utc::now()),
    }))
}

/// Acknowledge a finished job.
pub fn ack(conn: &Connection, job_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE ingest_queue SET status = 'done', acked_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), job_id],
    )?;
    Ok(())
}

/// Mark a job failed, keeping the error for inspection.
pub fn fail(conn: &Connection, job_id: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE ingest_queue SET status = 'failed', last_error = ?1 WHERE id = ?2",
        params![error, job_id],
    )?;
    Ok(())
}

/// Re-queue jobs stuck `running` past the lease — a crashed consumer left
/// them unacked, and at-least-once means they run again.
pub fn requeue_abandoned(conn: &Connection, lease_minutes: i64) -> Result<usize> {
    let cutoff = Utc::now() - Duration::minutes(lease_minutes);
    let requeued = conn.execute(
        "UPDATE ingest_queue SET status = 'queued', started_at = NULL \
         WHERE status = 'running' AND started_at < ?1",
        params![cutoff.to_rfc3339()],
    )?;
    if requeued > 0 {
        info!(requeued, "re-queued abandoned ingest jobs");
    }
    Ok(requeued)
}

/// Claim and run one job. Returns the consolidation result, or `None` when
/// the queue is empty.
pub fn run_once(engine: &mut Engine) -> Result<Option<ConsolidationResult>> {
    requeue_abandoned(&engine.session, engine.config.queue.lease_minutes)?;

    let Some(job) = claim_next(&engine.session)? else {
        return Ok(None);
    };

    let outcome = consolidate::consolidate_file(
        engine,
        &job.transcript_path,
        Some(&job.session_id),
        &job.project_id,
        true,
    );

    match outcome {
        Ok(result) => {
            ack(&engine.session, &job.id)?;
            if !result.saved.is_empty() || !result.reinforced.is_empty() {
                crate::events::emit(
                    &engine.intel,
                    "session_consolidated",
                    None,
                    serde_json::json!({
                        "session_id": result.session_id,
                        "saved": result.saved.len(),
                        "reinforced": result.reinforced.len(),
                        "quality": result.quality.score,
                    }),
                );
            }
            Ok(Some(result))
        }
        Err(e) => {
            warn!(job = %job.id, session = %job.session_id, error = %e, "consolidation failed");
            fail(&engine.session, &job.id, &e.to_string())?;
            Err(e)
        }
    }
}

/// Drain the queue until empty. Failed jobs don't stop the drain.
pub fn drain(engine: &mut Engine) -> Result<usize> {
    let mut processed = 0;
    loop {
        match run_once(engine) {
            Ok(Some(_)) => processed += 1,
            Ok(None) => break,
            Err(_) => processed += 1, // failure recorded on the job row
        }
    }
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::engine::test_support::test_engine;

    #[test]
    fn enqueue_claim_ack_lifecycle() {
        let conn = db::open_memory_session_db();
        let id = enqueue(&conn, 10, "sess-1", "alpha", "/tmp/t.jsonl")
            .unwrap()
            .unwrap();
        assert_eq!(pending_depth(&conn).unwrap(), 1);

        let job = claim_next(&conn).unwrap().unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.attempts, 1);
        assert_eq!(pending_depth(&conn).unwrap(), 0);

        ack(&conn, &job.id).unwrap();
        assert!(claim_next(&conn).unwrap().is_none());

        let status: String = conn
            .query_row(
                "SELECT status FROM ingest_queue WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "done");
    }

    #[test]
    fn claims_oldest_first() {
        let conn = db::open_memory_session_db();
        enqueue(&conn, 10, "sess-1", "alpha", "/tmp/a.jsonl").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        enqueue(&conn, 10, "sess-2", "alpha", "/tmp/b.jsonl").unwrap();

        assert_eq!(claim_next(&conn).unwrap().unwrap().session_id, "sess-1");
        assert_eq!(claim_next(&conn).unwrap().unwrap().session_id, "sess-2");
    }

    #[test]
    fn capacity_overflow_drops_with_none() {
        let conn = db::open_memory_session_db();
        assert!(enqueue(&conn, 1, "sess-1", "alpha", "/tmp/a.jsonl").unwrap().is_some());
        assert!(enqueue(&conn, 1, "sess-2", "alpha", "/tmp/b.jsonl").unwrap().is_none());
        assert_eq!(pending_depth(&conn).unwrap(), 1);
    }

    #[test]
    fn abandoned_jobs_are_requeued_after_lease() {
        let conn = db::open_memory_session_db();
        enqueue(&conn, 10, "sess-1", "alpha", "/tmp/a.jsonl").unwrap();
        let job = claim_next(&conn).unwrap().unwrap();

        // Simulate a crashed consumer: backdate started_at past the lease
        conn.execute(
            "UPDATE ingest_queue SET started_at = ?1 WHERE id = ?2",
            params![(Utc::now() - Duration::minutes(90)).to_rfc3339(), job.id],
        )
        .unwrap();

        assert_eq!(requeue_abandoned(&conn, 30).unwrap(), 1);
        let reclaimed = claim_next(&conn).unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
        assert_eq!(reclaimed.attempts, 2);

        // A fresh running job stays put
        conn.execute(
            "UPDATE ingest_queue SET started_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), job.id],
        )
        .unwrap();
        assert_eq!(requeue_abandoned(&conn, 30).unwrap(), 0);
    }

    #[test]
    fn run_once_consolidates_a_transcript() {
        let (dir, mut engine) = test_engine();
        let transcript = dir.path().join("session.jsonl");
        std::fs::write(
            &transcript,
            r#"{"role": "user", "content": "I learned that retries need jitter to avoid thundering herds."}"#,
        )
        .unwrap();

        enqueue(
            &engine.session,
            engine.config.queue.capacity,
            "sess-9",
            "alpha",
            transcript.to_str().unwrap(),
        )
        .unwrap();

        let result = run_once(&mut engine).unwrap().unwrap();
        assert_eq!(result.saved.len(), 1);
        assert_eq!(result.session_id, "sess-9");

        // Queue drained, job done
        assert!(run_once(&mut engine).unwrap().is_none());

        let memory = engine.store.read(&result.saved[0]).unwrap();
        assert_eq!(memory.meta.source_session, "sess-9");
    }

    #[test]
    fn missing_transcript_fails_the_job_not_the_queue() {
        let (_dir, mut engine) = test_engine();
        enqueue(
            &engine.session,
            engine.config.queue.capacity,
            "sess-x",
            "alpha",
            "/nonexistent/transcript.jsonl",
        )
        .unwrap();

        assert!(run_once(&mut engine).is_err());

        let status: String = engine
            .session
            .query_row(
                "SELECT status FROM ingest_queue WHERE session_id = 'sess-x'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(status, "failed");

        // Queue continues to function
        assert!(run_once(&mut engine).unwrap().is_none());
    }

    #[test]
    fn replayed_job_is_absorbed_by_dedup() {
        let (dir, mut engine) = test_engine();
        let transcript = dir.path().join("session.jsonl");
        std::fs::write(
            &transcript,
            r#"{"role": "user", "content": "I learned that retries need jitter to avoid thundering herds."}"#,
        )
        .unwrap();
        let path = transcript.to_str().unwrap();

        enqueue(&engine.session, 10, "sess-9", "alpha", path).unwrap();
        enqueue(&engine.session, 10, "sess-9", "alpha", path).unwrap();

        let first = run_once(&mut engine).unwrap().unwrap();
        assert_eq!(first.saved.len(), 1);
        let second = run_once(&mut engine).unwrap().unwrap();
        assert!(second.saved.is_empty());
        assert_eq!(second.reinforced, first.saved);
    }
}
