//! Integration tests for daemon lifecycle: startup run, report output,
//! stale cleanup, and graceful shutdown via CancellationToken.
//!
//! These run against a file-backed SQLite store with no remote tiers, so every
//! indicator resolves through the static fallback.
//!
//! Run with:
//! ```bash
//! cargo test -p macroswarm --test daemon_lifecycle
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use macroswarm::cache::sqlite::HistoryTable;
use macroswarm::cache::{DurableStore, SqliteStore};
use macroswarm::daemon::{run_cleanup, Daemon};
use macroswarm::fetcher::{Provider, ProviderRegistry};
use macroswarm::models::store_schema::CacheRow;
use macroswarm::models::{CompositeReport, FetchMethod, IndicatorSpec, MacroConfig};
use macroswarm::Swarm;

struct NoTiers;

impl ProviderRegistry for NoTiers {
    fn tiers(&self, _spec: &IndicatorSpec) -> Vec<Arc<dyn Provider>> {
        vec![]
    }
}

async fn swarm_at(path: &std::path::Path) -> Swarm {
    let mut config = MacroConfig::default();
    config.cache.sqlite_path = path.to_str().unwrap().to_string();
    config.cache.cleanup_interval_seconds = 1;
    let store = Arc::new(SqliteStore::open(&config.cache.sqlite_path).unwrap());
    Swarm::assemble(config, store, Arc::new(NoTiers))
        .await
        .unwrap()
}

fn stamp(at: chrono::DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The daemon runs once at startup, writes the report, and stops on cancel.
#[tokio::test]
async fn daemon_runs_on_startup_and_shuts_down() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let swarm = Arc::new(swarm_at(&dir.path().join("daemon.db")).await);

    let daemon = Daemon::new(swarm.clone(), Some(out.clone()));
    let cancel = daemon.cancel_token();
    let handle = tokio::spawn(async move { daemon.run().await });

    let latest = out.join("report.json");
    let mut waited = Duration::ZERO;
    while !latest.exists() && waited < Duration::from_secs(10) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("daemon did not stop")
        .unwrap();

    let report: CompositeReport =
        serde_json::from_str(&std::fs::read_to_string(&latest).unwrap()).unwrap();
    assert_eq!(report.live_count, 0);
    assert_eq!(report.fallback_count, 12);
    assert!(out.join("archive").read_dir().unwrap().next().is_some());

    assert_eq!(swarm.store.history_count(HistoryTable::Reports).unwrap(), 1);
    assert_eq!(swarm.store.latest_report().unwrap().unwrap().id, report.id);

    // Health records were flushed on shutdown.
    let health = swarm.health_summary(Duration::from_secs(3600)).unwrap();
    assert_eq!(health[&FetchMethod::Fallback].total, 10);
    assert_eq!(health[&FetchMethod::FredApi].success_rate, None);

    // A window past the representable range covers all history.
    let all = swarm.health_summary(Duration::MAX).unwrap();
    assert_eq!(all[&FetchMethod::Fallback].total, 10);
}

/// Cleanup drops expired cache rows and leaves live ones.
#[tokio::test]
async fn cleanup_expires_stale_rows() {
    let dir = tempfile::tempdir().unwrap();
    let swarm = swarm_at(&dir.path().join("cleanup.db")).await;
    let now = Utc::now();

    swarm
        .store
        .put(&CacheRow {
            key: "reading:VIX:fred_csv".to_string(),
            value_json: "{}".to_string(),
            created_at: stamp(now - chrono::Duration::hours(2)),
            expires_at: stamp(now - chrono::Duration::hours(1)),
        })
        .unwrap();
    swarm
        .store
        .put(&CacheRow {
            key: "reading:DXY:yahoo".to_string(),
            value_json: "{}".to_string(),
            created_at: stamp(now),
            expires_at: stamp(now + chrono::Duration::hours(1)),
        })
        .unwrap();

    run_cleanup(&swarm);

    assert_eq!(swarm.store.count().unwrap(), 1);
    assert!(swarm.store.get("reading:DXY:yahoo").unwrap().is_some());
    swarm.shutdown().await;
}

/// A reopened store still serves the previous run's history.
#[tokio::test]
async fn history_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("restart.db");

    let first = swarm_at(&path).await;
    let report = first.orchestrator.run().await.report().unwrap();
    first.shutdown().await;
    drop(first);

    let second = swarm_at(&path).await;
    assert_eq!(second.store.latest_report().unwrap().unwrap().id, report.id);
    assert_eq!(
        second.store.history_count(HistoryTable::Readings).unwrap(),
        12
    );
    second.shutdown().await;
}
