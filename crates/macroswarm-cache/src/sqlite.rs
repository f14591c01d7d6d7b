use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use macroswarm_models::store_schema::{CacheRow, STORE_DDL};
use macroswarm_models::{CompositeReport, FetchMethod, HealthRecord, MethodHealth, Reading};
use rusqlite::Connection;

use crate::error::CacheError;

/// Durable backing store for the cache layer and the run history.
///
/// Calls are synchronous and short; implementations serialize access internally.
pub trait DurableStore: Send + Sync {
    /// Unexpired row for `key`, if any.
    fn get(&self, key: &str) -> Result<Option<CacheRow>, CacheError>;
    fn put(&self, row: &CacheRow) -> Result<(), CacheError>;
    fn delete(&self, key: &str) -> Result<(), CacheError>;
    /// Every unexpired row, used to rehydrate the hot cache after a restart.
    fn load_unexpired(&self) -> Result<Vec<CacheRow>, CacheError>;

    fn append_reading(&self, reading: &Reading) -> Result<(), CacheError>;
    fn append_report(&self, report: &CompositeReport) -> Result<(), CacheError>;
    fn append_health(&self, record: &HealthRecord) -> Result<(), CacheError>;
    /// Per-method aggregate over records attempted at or after `since`.
    fn health_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<FetchMethod, MethodHealth>, CacheError>;

    /// Delete expired cache rows. Returns the number removed.
    fn expire_stale(&self) -> Result<usize, CacheError>;
    /// Delete history rows older than `keep_days`. Returns the number removed.
    fn prune_history(&self, keep_days: u32) -> Result<usize, CacheError>;
}

/// Fixed-width UTC timestamps so string comparison in SQL is chronological.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// SQLite-backed [`DurableStore`].
///
/// `rusqlite::Connection` is not `Sync`, so it sits behind a `Mutex`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file. Creates the schema and enables WAL.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(STORE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Number of rows in `cache_entries`, expired or not.
    pub fn count(&self) -> Result<usize, CacheError> {
        let count: usize =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Row count of a history table. Used by maintenance logging and tests.
    pub fn history_count(&self, table: HistoryTable) -> Result<usize, CacheError> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: usize = self.conn()?.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// Most recent stored report, if any.
    pub fn latest_report(&self) -> Result<Option<CompositeReport>, CacheError> {
        let conn = self.conn()?;
        let result = conn.query_row(
            "SELECT report_json FROM report_snapshots ORDER BY generated_at DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CacheError::Sqlite(e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTable {
    Readings,
    Reports,
    Health,
}

impl HistoryTable {
    fn name(self) -> &'static str {
        match self {
            HistoryTable::Readings => "factor_readings",
            HistoryTable::Reports => "report_snapshots",
            HistoryTable::Health => "source_health",
        }
    }

    fn time_column(self) -> &'static str {
        match self {
            HistoryTable::Readings => "fetched_at",
            HistoryTable::Reports => "generated_at",
            HistoryTable::Health => "attempted_at",
        }
    }
}

fn cache_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CacheRow> {
    Ok(CacheRow {
        key: row.get(0)?,
        value_json: row.get(1)?,
        created_at: row.get(2)?,
        expires_at: row.get(3)?,
    })
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<CacheRow>, CacheError> {
        let now = timestamp(Utc::now());
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, value_json, created_at, expires_at \
             FROM cache_entries WHERE key = ?1 AND expires_at > ?2",
        )?;

        match stmt.query_row(rusqlite::params![key, now], cache_row) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CacheError::Sqlite(e)),
        }
    }

    fn put(&self, row: &CacheRow) -> Result<(), CacheError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO cache_entries (key, value_json, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![row.key, row.value_json, row.created_at, row.expires_at],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.conn()?.execute(
            "DELETE FROM cache_entries WHERE key = ?1",
            rusqlite::params![key],
        )?;
        Ok(())
    }

    fn load_unexpired(&self) -> Result<Vec<CacheRow>, CacheError> {
        let now = timestamp(Utc::now());
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, value_json, created_at, expires_at \
             FROM cache_entries WHERE expires_at > ?1",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![now], cache_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn append_reading(&self, reading: &Reading) -> Result<(), CacheError> {
        self.conn()?.execute(
            "INSERT INTO factor_readings \
             (indicator, value, unit, signal, is_live, source_name, source_url, fetch_method, fetched_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                reading.key,
                reading.value,
                reading.unit,
                reading.signal.to_string(),
                reading.is_live,
                reading.provenance.source_name,
                reading.provenance.source_url,
                reading.provenance.method.as_str(),
                timestamp(reading.fetched_at),
            ],
        )?;
        Ok(())
    }

    fn append_report(&self, report: &CompositeReport) -> Result<(), CacheError> {
        let json = serde_json::to_string(report)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO report_snapshots \
             (id, overall_signal, weighted_score, degraded, live_count, fallback_count, report_json, generated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                report.id.to_string(),
                report.overall_signal.to_string(),
                report.weighted_score,
                report.degraded,
                report.live_count as i64,
                report.fallback_count as i64,
                json,
                timestamp(report.generated_at),
            ],
        )?;
        Ok(())
    }

    fn append_health(&self, record: &HealthRecord) -> Result<(), CacheError> {
        self.conn()?.execute(
            "INSERT INTO source_health \
             (indicator, fetch_method, success, latency_ms, error_message, attempted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.indicator,
                record.method.as_str(),
                record.success,
                record.latency_ms as i64,
                record.error,
                timestamp(record.attempted_at),
            ],
        )?;
        Ok(())
    }

    fn health_summary(
        &self,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<FetchMethod, MethodHealth>, CacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT fetch_method, COUNT(*), SUM(success), SUM(latency_ms) \
             FROM source_health WHERE attempted_at >= ?1 GROUP BY fetch_method",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![timestamp(since)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut summary: BTreeMap<FetchMethod, MethodHealth> = FetchMethod::ALL
            .into_iter()
            .map(|m| (m, MethodHealth::default()))
            .collect();
        for (method, total, successes, latency_sum) in rows {
            if let Some(method) = FetchMethod::parse(&method) {
                summary.insert(
                    method,
                    MethodHealth::from_totals(total as u64, successes as u64, latency_sum as u64),
                );
            }
        }
        Ok(summary)
    }

    fn expire_stale(&self) -> Result<usize, CacheError> {
        let now = timestamp(Utc::now());
        let deleted = self.conn()?.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted)
    }

    fn prune_history(&self, keep_days: u32) -> Result<usize, CacheError> {
        let keep = Duration::from_secs(u64::from(keep_days) * 86_400);
        let cutoff = timestamp(crate::health::window_start(Utc::now(), keep));
        let conn = self.conn()?;
        let mut deleted = 0;
        for table in [HistoryTable::Readings, HistoryTable::Reports, HistoryTable::Health] {
            let sql = format!(
                "DELETE FROM {} WHERE {} < ?1",
                table.name(),
                table.time_column()
            );
            deleted += conn.execute(&sql, rusqlite::params![cutoff])?;
        }
        Ok(deleted)
    }
}
