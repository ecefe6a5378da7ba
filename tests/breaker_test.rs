//! Circuit breaker behavior against a real on-disk state table.

mod helpers;

use engram::breaker::{BreakerRegistry, BreakerState};
use engram::config::BreakerConfig;
use engram::db;
use engram::error::EngramError;
use tempfile::TempDir;

fn intel_conn(dir: &TempDir) -> rusqlite::Connection {
    db::open_intelligence_db(dir.path().join("intelligence.db")).unwrap()
}

fn failing() -> anyhow::Result<()> {
    anyhow::bail!("llm backend unreachable")
}

#[test]
fn three_failures_open_the_circuit_and_block_the_fourth() {
    let dir = TempDir::new().unwrap();
    let conn = intel_conn(&dir);
    let mut registry = BreakerRegistry::new(BreakerConfig::default());

    for _ in 0..3 {
        let err = registry.call(&conn, "llm_extraction", failing).unwrap_err();
        assert!(!matches!(err, EngramError::CircuitOpen { .. }));
    }

    // Fourth call fails fast without invoking the function
    let mut invoked = false;
    let err = registry
        .call(&conn, "llm_extraction", || {
            invoked = true;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, EngramError::CircuitOpen { .. }));
    assert!(!invoked);

    let breaker = registry.breaker(&conn, "llm_extraction").unwrap();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(breaker.failure_count(), 3);
}

#[test]
fn open_state_survives_process_restart() {
    let dir = TempDir::new().unwrap();

    {
        let conn = intel_conn(&dir);
        let mut registry = BreakerRegistry::new(BreakerConfig::default());
        for _ in 0..3 {
            let _ = registry.call(&conn, "llm_extraction", failing);
        }
        registry.persist_all(&conn).unwrap();
    }

    // "Restart": a new connection and a new registry read the same table.
    let conn = intel_conn(&dir);
    let mut registry = BreakerRegistry::new(BreakerConfig::default());
    let err = registry
        .call(&conn, "llm_extraction", || Ok(()))
        .unwrap_err();
    assert!(matches!(err, EngramError::CircuitOpen { .. }));
}

#[test]
fn probe_after_recovery_closes_on_success() {
    let dir = TempDir::new().unwrap();
    let conn = intel_conn(&dir);
    // Zero recovery timeout: the breaker is probe-ready immediately after
    // opening, which compresses the 60s wait for the test.
    let mut registry = BreakerRegistry::new(BreakerConfig {
        failure_threshold: 3,
        recovery_timeout_s: 0,
    });

    for _ in 0..3 {
        let _ = registry.call(&conn, "llm_extraction", failing);
    }
    {
        let breaker = registry.breaker(&conn, "llm_extraction").unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    // The probe succeeds: breaker closes, failure count zeroed
    registry.call(&conn, "llm_extraction", || Ok(())).unwrap();
    let breaker = registry.breaker(&conn, "llm_extraction").unwrap();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}

#[test]
fn probe_failure_reopens() {
    let dir = TempDir::new().unwrap();
    let conn = intel_conn(&dir);
    let mut registry = BreakerRegistry::new(BreakerConfig {
        failure_threshold: 3,
        recovery_timeout_s: 0,
    });

    for _ in 0..3 {
        let _ = registry.call(&conn, "llm_extraction", failing);
    }
    // Probe is admitted and fails — straight back to OPEN
    let err = registry.call(&conn, "llm_extraction", failing).unwrap_err();
    assert!(!matches!(err, EngramError::CircuitOpen { .. }));

    // With a zero timeout it is immediately probe-ready again; the state
    // we persisted between calls must say OPEN.
    let state: String = conn
        .query_row(
            "SELECT state FROM breaker_state WHERE name = 'llm_extraction'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(state, "OPEN");
}

#[test]
fn sites_fail_independently() {
    let dir = TempDir::new().unwrap();
    let conn = intel_conn(&dir);
    let mut registry = BreakerRegistry::new(BreakerConfig::default());

    for _ in 0..3 {
        let _ = registry.call(&conn, "llm_extraction", failing);
    }

    // One degraded pathway does not block the other
    let value = registry
        .call(&conn, "contradiction_check", || Ok("fine"))
        .unwrap();
    assert_eq!(value, "fine");
}
