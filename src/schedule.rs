//! Periodic crawling
//!
//! Update runs recheck known repositories on a short cadence while discovery
//! runs search for new ones far less often. Runs execute one at a time on the
//! calling task; ticks that fall due during a long run are skipped rather
//! than queued up.

use crate::config::ScheduleConfig;
use crate::crawler::{CrawlAborted, CrawlMode, Orchestrator};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// Runs the configured schedule until `shutdown` resolves
///
/// Both cadences fire once immediately. Returns `Err` if a run aborts, which
/// only happens when the API credential is rejected.
pub async fn run_schedule(
    orchestrator: Arc<Orchestrator>,
    schedule: &ScheduleConfig,
    config_hash: &str,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CrawlAborted> {
    run_every(
        orchestrator,
        Duration::from_secs(schedule.update_every_secs),
        Duration::from_secs(schedule.discover_every_secs),
        config_hash,
        shutdown,
    )
    .await
}

async fn run_every(
    orchestrator: Arc<Orchestrator>,
    update_every: Duration,
    discover_every: Duration,
    config_hash: &str,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CrawlAborted> {
    tracing::info!(
        "Scheduler started (update every {:?}, discover every {:?})",
        update_every,
        discover_every
    );

    let mut update_tick = interval(update_every);
    update_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut discover_tick = interval(discover_every);
    discover_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tokio::pin!(shutdown);

    loop {
        let mode = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("Scheduler stopping");
                return Ok(());
            }
            _ = update_tick.tick() => CrawlMode::Update,
            _ = discover_tick.tick() => CrawlMode::Discover,
        };

        let run_id = match orchestrator.queue_run(mode, config_hash) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("Failed to record scheduled {} run: {}", mode, e);
                continue;
            }
        };

        match orchestrator.run_tracked(run_id, mode).await {
            Ok(stats) => tracing::info!("Scheduled {} run {} finished: {}", mode, run_id, stats),
            Err(aborted) => return Err(aborted),
        }
    }
}
