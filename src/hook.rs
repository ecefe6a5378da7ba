//! Session-end hook — the host-facing producer.
//!
//! The host invokes `engram hook session-end` with a JSON payload on
//! stdin. The hook's only job is to enqueue and get out of the way: it
//! must return within about a second and must never raise to the host, so
//! every failure path logs and still exits 0. `SKIP_HOOK_SESSION_END=1`
//! bypasses it entirely.

use std::io::Read;

use serde::Deserialize;
use tracing::{info, warn};

use crate::config::EngramConfig;

#[derive(Debug, Deserialize)]
struct HookPayload {
    session_id: String,
    #[serde(default)]
    project_id: Option<String>,
    transcript_path: String,
}

/// Run the session-end hook over `input` (stdin in production).
///
/// Always returns exit code 0 — consolidation is best-effort and the host
/// must never see a failure.
pub fn session_end(config: &EngramConfig, input: &mut dyn Read) -> i32 {
    if skip_requested("SKIP_HOOK_SESSION_END") {
        info!("session-end hook skipped via SKIP_HOOK_SESSION_END");
        return 0;
    }

    if let Err(e) = try_enqueue(config, input) {
        warn!(error = %e, "session-end hook failed (exiting 0 regardless)");
    }
    0
}

fn try_enqueue(config: &EngramConfig, input: &mut dyn Read) -> crate::error::Result<()> {
    let mut raw = String::new();
    input.read_to_string(&mut raw)?;
    let payload: HookPayload = serde_json::from_str(&raw)?;

    let project = payload
        .project_id
        .unwrap_or_else(|| config.storage.project_id.clone());

    let conn = crate::db::open_session_db(config.session_db())?;
    let enqueued = crate::queue::enqueue(
        &conn,
        config.queue.capacity,
        &payload.session_id,
        &project,
        &payload.transcript_path,
    )?;

    match enqueued {
        Some(job_id) => {
            info!(job = %job_id, session = %payload.session_id, "session queued for consolidation")
        }
        None => warn!(session = %payload.session_id, "queue at capacity, session dropped"),
    }
    Ok(())
}

fn skip_requested(var: &str) -> bool {
    std::env::var(var)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
