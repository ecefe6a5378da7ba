//! Circuit breaker for outbound LLM calls.
//!
//! One breaker per named call site (extraction, contradiction check) so a
//! degraded pathway does not block the others. Three states:
//!
//!   CLOSED    — calls pass through; consecutive failures are counted
//!   OPEN      — calls fail immediately with `CircuitOpen`
//!   HALF_OPEN — one probe call is allowed; success closes, failure reopens
//!
//! State survives process restart via the `breaker_state` table in the
//! intelligence database.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::error::{EngramError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "OPEN" => Self::Open,
            "HALF_OPEN" => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

/// State machine for a single named call site.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: &BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::seconds(config.recovery_timeout_s as i64),
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
        }
    }

    /// Current state, accounting for the recovery timeout. OPEN breakers
    /// whose timeout has elapsed move to HALF_OPEN here.
    pub fn state(&mut self) -> BreakerState {
        self.state_at(Utc::now())
    }

    fn state_at(&mut self, now: DateTime<Utc>) -> BreakerState {
        if self.state == BreakerState::Open {
            if let Some(opened_at) = self.opened_at {
                if now - opened_at >= self.recovery_timeout {
                    debug!(breaker = %self.name, "recovery timeout elapsed, half-open");
                    self.state = BreakerState::HalfOpen;
                }
            }
        }
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Execute `f` through the breaker. In OPEN, returns `CircuitOpen`
    /// without invoking `f`. Inner errors are recorded and passed through.
    pub fn call<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        self.call_at(Utc::now(), f)
    }

    fn call_at<T, F>(&mut self, now: DateTime<Utc>, f: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        if self.state_at(now) == BreakerState::Open {
            return Err(EngramError::CircuitOpen {
                name: self.name.clone(),
                failures: self.failure_count,
            });
        }

        match f() {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure_at(now);
                Err(EngramError::Other(e))
            }
        }
    }

    /// Record a failure: increments the counter and opens the breaker once
    /// the threshold is reached (or immediately from HALF_OPEN).
    pub fn record_failure(&mut self) {
        self.record_failure_at(Utc::now());
    }

    fn record_failure_at(&mut self, now: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_failure_at = Some(now);
        if self.state == BreakerState::HalfOpen || self.failure_count >= self.failure_threshold {
            if self.state != BreakerState::Open {
                warn!(breaker = %self.name, failures = self.failure_count, "circuit opened");
            }
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
        }
    }

    /// Record a success: zeroes the counter and closes the breaker.
    pub fn record_success(&mut self) {
        if self.state != BreakerState::Closed {
            debug!(breaker = %self.name, "circuit closed");
        }
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    /// Force the breaker back to CLOSED with zero failures.
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.failure_count = 0;
        self.last_failure_at = None;
        self.opened_at = None;
    }
}

/// Registry of named breakers backed by the `breaker_state` table.
///
/// Owned by the engine and passed by reference — not a process-global.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: HashMap<String, CircuitBreaker>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: HashMap::new(),
        }
    }

    /// Get (or create) the breaker for a call site, loading persisted state
    /// on first access.
    pub fn breaker(&mut self, conn: &Connection, name: &str) -> Result<&mut CircuitBreaker> {
        if !self.breakers.contains_key(name) {
            let mut breaker = CircuitBreaker::new(name, &self.config);
            if let Some(persisted) = load_state(conn, name)? {
                breaker.state = persisted.0;
                breaker.failure_count = persisted.1;
                breaker.last_failure_at = persisted.2;
                breaker.opened_at = persisted.3;
            }
            self.breakers.insert(name.to_string(), breaker);
        }
        Ok(self.breakers.get_mut(name).expect("just inserted"))
    }

    /// Run `f` through the named breaker and persist the resulting state.
    pub fn call<T, F>(&mut self, conn: &Connection, name: &str, f: F) -> Result<T>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        let breaker = self.breaker(conn, name)?;
        let result = breaker.call(f);
        let snapshot = breaker.clone();
        persist_state(conn, &snapshot)?;
        result
    }

    /// Persist every loaded breaker — called at teardown.
    pub fn persist_all(&self, conn: &Connection) -> Result<()> {
        for breaker in self.breakers.values() {
            persist_state(conn, breaker)?;
        }
        Ok(())
    }
}

type PersistedState = (BreakerState, u32, Option<DateTime<Utc>>, Option<DateTime<Utc>>);

fn load_state(conn: &Connection, name: &str) -> Result<Option<PersistedState>> {
    let row = conn
        .query_row(
            "SELECT state, failure_count, last_failure_at, opened_at \
             FROM breaker_state WHERE name = ?1",
            params![name],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(state, failures, last_failure, opened_at)| {
        (
            BreakerState::parse(&state),
            failures,
            last_failure.and_then(|s| s.parse().ok()),
            opened_at.and_then(|s| s.parse().ok()),
        )
    }))
}

fn persist_state(conn: &Connection, breaker: &CircuitBreaker) -> Result<()> {
    conn.execute(
        "INSERT INTO breaker_state (name, state, failure_count, last_failure_at, opened_at) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(name) DO UPDATE SET \
           state = excluded.state, \
           failure_count = excluded.failure_count, \
           last_failure_at = excluded.last_failure_at, \
           opened_at = excluded.opened_at",
        params![
            breaker.name,
            breaker.state.as_str(),
            breaker.failure_count,
            breaker.last_failure_at.map(|t| t.to_rfc3339()),
            breaker.opened_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}
