//! `engram worker` — the background queue consumer.
//!
//! Drains the ingest queue, then polls. `--once` drains and exits, for
//! scheduler-driven setups without a long-running process. Ctrl-C stops
//! the loop between jobs, never mid-job.

use std::time::Duration;

use tracing::{error, info};

use crate::config::EngramConfig;
use crate::engine::Engine;
use crate::error::Result;
use crate::queue;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run(config: &EngramConfig, once: bool) -> Result<()> {
    let mut engine = Engine::open(config.clone())?;
    engine.load_embedder()?;

    if once {
        let processed = queue::drain(&mut engine)?;
        println!("Processed {processed} job(s).");
        engine.teardown()?;
        return Ok(());
    }

    info!("worker started, polling every {POLL_INTERVAL:?}");
    loop {
        // Drain inside a blocking section; consolidation is CPU + file I/O.
        match queue::drain(&mut engine) {
            Ok(0) => {}
            Ok(n) => info!(processed = n, "drained ingest queue"),
            Err(e) => error!(error = %e, "queue drain failed, will retry"),
        }

        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    engine.teardown()?;
    Ok(())
}
