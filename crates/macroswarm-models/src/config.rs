use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog;
use crate::derived::DerivedKind;
use crate::reading::FetchMethod;
use crate::signal::{SignalBands, Threshold};
use crate::vote::Dimension;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("duplicate indicator key: {0}")]
    DuplicateKey(String),

    #[error("indicator {0}: inconsistent threshold")]
    InvalidThreshold(String),

    #[error("indicator {0}: derived component {1} is not configured")]
    MissingComponent(String, String),

    #[error("agent {0}: unknown member indicator {1}")]
    UnknownMember(String, String),

    #[error("agent {0}: weight must be positive and finite")]
    InvalidWeight(String),

    #[error("signal bands must satisfy bearish_below <= 0 <= bullish_above")]
    InvalidBands,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MacroConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "catalog::default_indicators")]
    pub indicators: Vec<IndicatorSpec>,
    #[serde(default = "catalog::default_derived")]
    pub derived: Vec<DerivedSpec>,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            fetch: FetchConfig::default(),
            providers: ProvidersConfig::default(),
            swarm: SwarmConfig::default(),
            schedule: ScheduleConfig::default(),
            indicators: catalog::default_indicators(),
            derived: catalog::default_derived(),
        }
    }
}

impl MacroConfig {
    /// Every key that a fetch run yields a reading for.
    pub fn all_keys(&self) -> Vec<&str> {
        self.indicators
            .iter()
            .map(|i| i.key.as_str())
            .chain(self.derived.iter().map(|d| d.key.as_str()))
            .collect()
    }

    /// Threshold policy per key, for both resolved and derived indicators.
    pub fn thresholds(&self) -> BTreeMap<String, Option<Threshold>> {
        self.indicators
            .iter()
            .map(|i| (i.key.clone(), i.threshold))
            .chain(self.derived.iter().map(|d| (d.key.clone(), d.threshold)))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut keys = HashSet::new();
        for key in self.all_keys() {
            if !keys.insert(key) {
                return Err(ConfigError::DuplicateKey(key.to_string()));
            }
        }

        for (key, threshold) in self.thresholds() {
            if let Some(t) = threshold {
                if !t.is_consistent() {
                    return Err(ConfigError::InvalidThreshold(key));
                }
            }
        }

        for d in &self.derived {
            for component in d.kind.components() {
                if !self.indicators.iter().any(|i| i.key == *component) {
                    return Err(ConfigError::MissingComponent(
                        d.key.clone(),
                        component.to_string(),
                    ));
                }
            }
        }

        for agent in &self.swarm.agents {
            if !(agent.weight.is_finite() && agent.weight > 0.0) {
                return Err(ConfigError::InvalidWeight(agent.name.clone()));
            }
            for member in &agent.members {
                if !keys.contains(member.as_str()) {
                    return Err(ConfigError::UnknownMember(
                        agent.name.clone(),
                        member.clone(),
                    ));
                }
            }
        }

        let bands = &self.swarm.bands;
        if !(bands.bearish_below <= 0.0 && bands.bullish_above >= 0.0) {
            return Err(ConfigError::InvalidBands);
        }

        if self.fetch.workers == 0 {
            return Err(ConfigError::Zero("fetch.workers"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("retry.max_attempts"));
        }
        Ok(())
    }
}

/// Configuration for the cache layer and its durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Path to the SQLite file backing the cache and history tables.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Maximum number of entries in the in-memory moka cache.
    #[serde(default = "default_memory_capacity")]
    pub memory_max_capacity: u64,
    /// TTL for tiers without an explicit entry in `tier_ttl_seconds`.
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    /// Per-tier TTL override, keyed by fetch method (e.g. `fred_api = 1800`).
    #[serde(default = "default_tier_ttls")]
    pub tier_ttl_seconds: BTreeMap<String, u64>,
    /// Interval between expired-entry cleanup runs in daemon mode.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// History rows older than this are pruned by the cleanup loop.
    #[serde(default = "default_keep_days")]
    pub history_keep_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            memory_max_capacity: default_memory_capacity(),
            default_ttl_seconds: default_ttl(),
            tier_ttl_seconds: default_tier_ttls(),
            cleanup_interval_seconds: default_cleanup_interval(),
            history_keep_days: default_keep_days(),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, method: FetchMethod) -> Duration {
        let secs = self
            .tier_ttl_seconds
            .get(method.as_str())
            .copied()
            .unwrap_or(self.default_ttl_seconds);
        Duration::from_secs(secs)
    }
}

/// Retry policy applied within a single tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts per tier, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f32,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Add random jitter in `[0, delay)` to every backoff step.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    /// Indicators resolved concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Upper bound on a single provider call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
    /// Warn when the static fallback snapshot is older than this.
    #[serde(default = "default_fallback_max_age")]
    pub fallback_max_age_days: i64,
    /// Observation window requested from bulk CSV downloads.
    #[serde(default = "default_csv_lookback")]
    pub csv_lookback_days: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            call_timeout_seconds: default_call_timeout(),
            fallback_max_age_days: default_fallback_max_age(),
            csv_lookback_days: default_csv_lookback(),
        }
    }
}

/// Endpoints and credentials for remote providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvidersConfig {
    #[serde(default = "default_fred_api_url")]
    pub fred_api_url: String,
    #[serde(default = "default_fred_csv_url")]
    pub fred_csv_url: String,
    #[serde(default = "default_yahoo_url")]
    pub yahoo_url: String,
    #[serde(default = "default_yahoo_cookie_url")]
    pub yahoo_cookie_url: String,
    /// Environment variable holding the FRED API key. The API tier is skipped without it.
    #[serde(default = "default_fred_key_env")]
    pub fred_api_key_env: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            fred_api_url: default_fred_api_url(),
            fred_csv_url: default_fred_csv_url(),
            yahoo_url: default_yahoo_url(),
            yahoo_cookie_url: default_yahoo_cookie_url(),
            fred_api_key_env: default_fred_key_env(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmConfig {
    #[serde(default)]
    pub bands: SignalBands,
    #[serde(default = "catalog::default_agents")]
    pub agents: Vec<AgentSpec>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            bands: SignalBands::default(),
            agents: catalog::default_agents(),
        }
    }
}

/// One classifier agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub dimension: Dimension,
    pub weight: f64,
    /// Indicator keys this agent consumes. All are required.
    pub members: Vec<String>,
    pub formula: Option<String>,
}

/// Daily update time for daemon mode, in UTC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default = "default_update_hour")]
    pub update_hour: u32,
    #[serde(default = "default_update_minute")]
    pub update_minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            update_hour: default_update_hour(),
            update_minute: default_update_minute(),
        }
    }
}

/// Static configuration for one independently resolved indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSpec {
    pub key: String,
    pub name: String,
    pub name_en: String,
    #[serde(default)]
    pub unit: String,
    /// Ordered provider tiers, tried first to last.
    #[serde(default)]
    pub tiers: Vec<TierConfig>,
    /// Terminal tier. Always succeeds.
    pub fallback: FallbackConfig,
    /// `None` marks a context-only indicator that never votes.
    #[serde(default)]
    pub threshold: Option<Threshold>,
    /// Plausible value range; anything outside is discarded like a zero value.
    #[serde(default)]
    pub bounds: Option<ValueBounds>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ValueBounds {
    pub min: f64,
    pub max: f64,
}

impl ValueBounds {
    pub fn contains(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }
}

/// One provider tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TierConfig {
    FredApi {
        series: String,
    },
    FredCsv {
        series: String,
    },
    Yahoo {
        symbol: String,
        #[serde(default = "default_quote_field")]
        field: String,
    },
    Scrape {
        url: String,
        /// Text preceding the value, tried in order.
        #[serde(default = "default_scrape_markers")]
        markers: Vec<String>,
        /// Values at or below this are rejected as parse noise.
        #[serde(default)]
        min_value: Option<f64>,
    },
}

impl TierConfig {
    pub fn method(&self) -> FetchMethod {
        match self {
            TierConfig::FredApi { .. } => FetchMethod::FredApi,
            TierConfig::FredCsv { .. } => FetchMethod::FredCsv,
            TierConfig::Yahoo { .. } => FetchMethod::Yahoo,
            TierConfig::Scrape { .. } => FetchMethod::Scrape,
        }
    }
}

/// Last-known value snapshot served when every tier fails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackConfig {
    pub value: f64,
    pub as_of: NaiveDate,
    #[serde(default)]
    pub source_url: String,
}

/// An indicator computed from resolved components.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedSpec {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub kind: DerivedKind,
    #[serde(default)]
    pub threshold: Option<Threshold>,
}

fn default_sqlite_path() -> String {
    "data/macroswarm.db".to_string()
}
fn default_memory_capacity() -> u64 {
    1_000
}
fn default_ttl() -> u64 {
    1800
}
fn default_tier_ttls() -> BTreeMap<String, u64> {
    [
        (FetchMethod::FredApi, 1800),
        (FetchMethod::FredCsv, 1800),
        (FetchMethod::Yahoo, 600),
        (FetchMethod::Scrape, 3600),
    ]
    .into_iter()
    .map(|(method, secs)| (method.as_str().to_string(), secs))
    .collect()
}
fn default_cleanup_interval() -> u64 {
    300
}
fn default_keep_days() -> u32 {
    365
}
fn default_max_attempts() -> usize {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_multiplier() -> f32 {
    2.0
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_true() -> bool {
    true
}
fn default_workers() -> usize {
    4
}
fn default_call_timeout() -> u64 {
    15
}
fn default_fallback_max_age() -> i64 {
    14
}
fn default_csv_lookback() -> i64 {
    90
}
fn default_fred_api_url() -> String {
    "https://api.stlouisfed.org/fred/series/observations".to_string()
}
fn default_fred_csv_url() -> String {
    "https://fred.stlouisfed.org/graph/fredgraph.csv".to_string()
}
fn default_yahoo_url() -> String {
    "https://query2.finance.yahoo.com".to_string()
}
fn default_yahoo_cookie_url() -> String {
    "https://fc.yahoo.com".to_string()
}
fn default_fred_key_env() -> String {
    "FRED_API_KEY".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_update_hour() -> u32 {
    13
}
fn default_update_minute() -> u32 {
    30
}
fn default_quote_field() -> String {
    "regularMarketPrice".to_string()
}
fn default_scrape_markers() -> Vec<String> {
    vec!["id=\"current\"".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::ThresholdDirection;

    #[test]
    fn default_config_is_valid() {
        let config = MacroConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.swarm.agents.len(), 3);
        assert_eq!(config.all_keys().len(), 12);
    }

    #[test]
    fn roundtrip_config_through_toml() {
        let config = MacroConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: MacroConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config: MacroConfig = toml::from_str("").unwrap();
        assert_eq!(config, MacroConfig::default());
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
derived = []

[cache]
sqlite_path = "/tmp/macro.db"
tier_ttl_seconds = { fred_api = 60, yahoo = 30 }

[retry]
max_attempts = 5
base_delay_ms = 10
multiplier = 3.0
jitter = false

[fetch]
workers = 2

[swarm]
bands = { bullish_above = 0.15, bearish_below = -0.15 }

[[swarm.agents]]
name = "RiskSentimentAgent"
dimension = "RISK_SENTIMENT"
weight = 1.0
members = ["VIX"]

[[indicators]]
key = "VIX"
name = "VIX"
name_en = "CBOE Volatility Index"
tiers = [
    { kind = "fred_csv", series = "VIXCLS" },
    { kind = "yahoo", symbol = "^VIX" },
]
fallback = { value = 17.79, as_of = "2026-02-10" }
threshold = { bullish = 15.0, bearish = 25.0, direction = "lower_is_bullish" }
bounds = { min = 5.0, max = 100.0 }
"#;
        let config: MacroConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.cache.ttl_for(FetchMethod::FredApi), Duration::from_secs(60));
        assert_eq!(config.cache.ttl_for(FetchMethod::Scrape), Duration::from_secs(1800));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 8000);
        assert!(!config.retry.jitter);
        assert_eq!(config.swarm.bands.bullish_above, 0.15);

        let vix = &config.indicators[0];
        assert_eq!(vix.tiers.len(), 2);
        assert_eq!(vix.tiers[0].method(), FetchMethod::FredCsv);
        assert_eq!(
            vix.tiers[1],
            TierConfig::Yahoo {
                symbol: "^VIX".to_string(),
                field: "regularMarketPrice".to_string()
            }
        );
        assert_eq!(
            vix.threshold.unwrap().direction,
            ThresholdDirection::LowerIsBullish
        );
    }

    #[test]
    fn validate_rejects_unknown_agent_member() {
        let mut config = MacroConfig::default();
        config.swarm.agents[0].members.push("GOLD".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownMember(_, m)) if m == "GOLD"
        ));
    }

    #[test]
    fn validate_rejects_bad_weight_and_bands() {
        let mut config = MacroConfig::default();
        config.swarm.agents[1].weight = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeight(_))
        ));

        let mut config = MacroConfig::default();
        config.swarm.bands = SignalBands {
            bullish_above: -0.1,
            bearish_below: 0.1,
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidBands));
    }

    #[test]
    fn validate_rejects_inverted_threshold() {
        let mut config = MacroConfig::default();
        let vix = config
            .indicators
            .iter_mut()
            .find(|i| i.key == "VIX")
            .unwrap();
        vix.threshold = Some(Threshold::lower_is_bullish(25.0, 15.0));
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidThreshold("VIX".to_string()))
        );
    }

    #[test]
    fn validate_rejects_missing_derived_component() {
        let mut config = MacroConfig::default();
        config.indicators.retain(|i| i.key != "RRP");
        config.swarm.agents[0].members.retain(|m| m != "RRP");
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingComponent(
                "NET_LIQUIDITY".to_string(),
                "RRP".to_string()
            ))
        );
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = MacroConfig::default();
        config.fetch.workers = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("fetch.workers")));
    }

    #[test]
    fn value_bounds_are_inclusive() {
        let b = ValueBounds { min: 5.0, max: 100.0 };
        assert!(b.contains(5.0));
        assert!(b.contains(100.0));
        assert!(!b.contains(4.99));
    }
}
