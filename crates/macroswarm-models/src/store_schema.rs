/// SQLite schema for the durable store: the write-through cache table plus
/// the append-only history tables (readings, reports, source health).
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS cache_entries (
///     key         TEXT PRIMARY KEY,
///     value_json  TEXT NOT NULL,
///     created_at  TEXT NOT NULL,
///     expires_at  TEXT NOT NULL
/// );
/// ```
pub const STORE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS cache_entries (
    key         TEXT PRIMARY KEY,
    value_json  TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at);

CREATE TABLE IF NOT EXISTS factor_readings (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator     TEXT    NOT NULL,
    value         REAL    NOT NULL,
    unit          TEXT    NOT NULL,
    signal        TEXT    NOT NULL,
    is_live       INTEGER NOT NULL,
    source_name   TEXT    NOT NULL,
    source_url    TEXT    NOT NULL,
    fetch_method  TEXT    NOT NULL,
    fetched_at    TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_readings_key_time ON factor_readings(indicator, fetched_at);

CREATE TABLE IF NOT EXISTS report_snapshots (
    id               TEXT    PRIMARY KEY,
    overall_signal   TEXT    NOT NULL,
    weighted_score   REAL    NOT NULL,
    degraded         INTEGER NOT NULL,
    live_count       INTEGER NOT NULL,
    fallback_count   INTEGER NOT NULL,
    report_json      TEXT    NOT NULL,
    generated_at     TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_reports_time ON report_snapshots(generated_at);

CREATE TABLE IF NOT EXISTS source_health (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    indicator     TEXT    NOT NULL,
    fetch_method  TEXT    NOT NULL,
    success       INTEGER NOT NULL,
    latency_ms    INTEGER NOT NULL,
    error_message TEXT,
    attempted_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_health_time ON source_health(attempted_at);
";

/// Cache key conventions.
///
/// - Tier results: `reading:{indicator}:{method}` (e.g. `reading:VIX:fred_csv`)
pub mod key_patterns {
    use crate::reading::FetchMethod;

    pub fn reading(indicator: &str, method: FetchMethod) -> String {
        format!("reading:{indicator}:{method}")
    }
}

/// A raw cache row as stored in SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRow {
    pub key: String,
    pub value_json: String,
    pub created_at: String,
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::FetchMethod;

    #[test]
    fn key_pattern_reading() {
        assert_eq!(
            key_patterns::reading("VIX", FetchMethod::FredCsv),
            "reading:VIX:fred_csv"
        );
        assert_eq!(
            key_patterns::reading("DXY", FetchMethod::Yahoo),
            "reading:DXY:yahoo"
        );
    }
}
