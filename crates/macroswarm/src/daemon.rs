use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use macroswarm_agents::RunOutcome;
use macroswarm_cache::DurableStore;
use macroswarm_models::ScheduleConfig;
use tokio_util::sync::CancellationToken;

use crate::output;
use crate::Swarm;

/// Runs the swarm once at startup, then daily at the configured UTC time,
/// alongside a periodic cache cleanup loop.
pub struct Daemon {
    swarm: Arc<Swarm>,
    output_dir: Option<PathBuf>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(swarm: Arc<Swarm>, output_dir: Option<PathBuf>) -> Self {
        Self {
            swarm,
            output_dir,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the daemon until cancelled.
    pub async fn run(&self) {
        tracing::info!("MacroSwarm daemon starting");

        let mut join_set = tokio::task::JoinSet::new();

        {
            let swarm = self.swarm.clone();
            let output_dir = self.output_dir.clone();
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                schedule_loop(swarm, output_dir, cancel).await;
            });
        }

        {
            let swarm = self.swarm.clone();
            let cancel = self.cancel.clone();
            let interval = Duration::from_secs(self.swarm.config.cache.cleanup_interval_seconds);
            join_set.spawn(async move {
                cleanup_loop(swarm, interval, cancel).await;
            });
        }

        while join_set.join_next().await.is_some() {}

        self.swarm.shutdown().await;
        tracing::info!("MacroSwarm daemon stopped");
    }
}

/// The first scheduled instant strictly after `now`.
pub fn next_run_after(now: DateTime<Utc>, schedule: &ScheduleConfig) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(schedule.update_hour, schedule.update_minute, 0)
        .unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

async fn schedule_loop(swarm: Arc<Swarm>, output_dir: Option<PathBuf>, cancel: CancellationToken) {
    // Run immediately on startup
    run_and_write(&swarm, output_dir.as_deref()).await;

    loop {
        let now = Utc::now();
        let next = next_run_after(now, &swarm.config.schedule);
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(next = %next, wait_secs = wait.as_secs(), "Next scheduled run");

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Schedule loop shutting down");
                break;
            }
            _ = tokio::time::sleep(wait) => {
                run_and_write(&swarm, output_dir.as_deref()).await;
            }
        }
    }
}

/// One orchestrator run; writes the report when an output directory is set.
pub async fn run_and_write(swarm: &Swarm, output_dir: Option<&Path>) -> RunOutcome {
    let outcome = swarm.orchestrator.run().await;
    match (&outcome, output_dir) {
        (RunOutcome::Completed(report), Some(dir)) => {
            if let Err(e) = output::write_report(dir, report) {
                tracing::error!(error = %e, "Failed to write report");
            }
        }
        (RunOutcome::Completed(_), None) => {}
        (RunOutcome::AlreadyRunning, _) => {
            tracing::warn!("Scheduled run skipped; a run is already in progress");
        }
    }
    outcome
}

/// Periodically drop expired cache rows and prune old history.
async fn cleanup_loop(swarm: Arc<Swarm>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Cleanup loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                run_cleanup(&swarm);
            }
        }
    }
}

pub fn run_cleanup(swarm: &Swarm) {
    match swarm.cache.expire_stale() {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(deleted, "Cleaned up stale cache entries");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "Stale cleanup failed");
        }
    }

    match swarm.store.prune_history(swarm.config.cache.history_keep_days) {
        Ok(deleted) if deleted > 0 => {
            tracing::info!(deleted, "Pruned history rows");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %e, "History pruning failed");
        }
    }
}
