use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use macroswarm_models::{FetchMethod, HealthRecord, MethodHealth};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sqlite::DurableStore;

/// Records older than this are dropped from the in-memory log.
const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Append-only log of provider attempts, aggregated on query.
///
/// `record` never waits on I/O: it pushes to an in-memory log under a short
/// lock and hands the record to a background task that mirrors it to the
/// durable store.
pub struct HealthTracker {
    log: Mutex<VecDeque<HealthRecord>>,
    retention: Duration,
    mirror: Mutex<Option<mpsc::UnboundedSender<HealthRecord>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            log: Mutex::new(VecDeque::new()),
            retention: DEFAULT_RETENTION,
            mirror: Mutex::new(None),
            writer: Mutex::new(None),
        }
    }

    /// Mirror every record to `store` from a background task.
    /// Must be called inside a tokio runtime.
    pub fn with_store(store: Arc<dyn DurableStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<HealthRecord>();
        let writer = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = store.append_health(&record) {
                    warn!(
                        indicator = %record.indicator,
                        method = %record.method,
                        error = %e,
                        "Failed to persist health record"
                    );
                }
            }
            debug!("Health writer stopped");
        });

        Self {
            mirror: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
            ..Self::new()
        }
    }

    pub fn record(&self, record: HealthRecord) {
        if let Ok(mirror) = self.mirror.lock() {
            if let Some(tx) = mirror.as_ref() {
                let _ = tx.send(record.clone());
            }
        }

        let Ok(mut log) = self.log.lock() else {
            return;
        };
        let cutoff = window_start(record.attempted_at, self.retention);
        while log.front().is_some_and(|r| r.attempted_at < cutoff) {
            log.pop_front();
        }
        log.push_back(record);
    }

    /// Aggregate per method over the trailing `window`. Every method is present;
    /// methods without attempts report `success_rate: None`.
    pub fn query(&self, window: Duration) -> BTreeMap<FetchMethod, MethodHealth> {
        let since = window_start(Utc::now(), window);
        let mut totals: BTreeMap<FetchMethod, (u64, u64, u64)> = FetchMethod::ALL
            .into_iter()
            .map(|m| (m, (0, 0, 0)))
            .collect();

        if let Ok(log) = self.log.lock() {
            for r in log.iter().filter(|r| r.attempted_at >= since) {
                let entry = totals.entry(r.method).or_default();
                entry.0 += 1;
                entry.1 += u64::from(r.success);
                entry.2 += r.latency_ms;
            }
        }

        totals
            .into_iter()
            .map(|(m, (total, ok, latency))| (m, MethodHealth::from_totals(total, ok, latency)))
            .collect()
    }

    /// Number of records currently held in memory.
    pub fn len(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop mirroring and wait until every queued record has been written.
    pub async fn close(&self) {
        if let Ok(mut mirror) = self.mirror.lock() {
            mirror.take();
        }
        let writer = self.writer.lock().ok().and_then(|mut w| w.take());
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Health writer task failed");
            }
        }
    }
}

/// Start of the trailing `window` ending at `now`. Windows reaching past the
/// representable range start at the earliest instant, covering all history.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
