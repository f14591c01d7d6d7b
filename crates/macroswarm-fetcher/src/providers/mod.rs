pub mod fallback;
pub mod fred_api;
pub mod fred_csv;
pub mod multpl;
pub mod yahoo;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use macroswarm_models::{FetchMethod, IndicatorSpec, ProvidersConfig, TierConfig};
use tracing::debug;

use crate::error::FetchError;
use fred_api::FredApiProvider;
use fred_csv::FredCsvProvider;
use multpl::ScrapeProvider;
use yahoo::{YahooProvider, YahooSession};

/// A raw value from one provider, before zero/bounds filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub value: f64,
    /// Date of the observation when the source reports one.
    pub as_of: Option<NaiveDate>,
}

impl Observation {
    pub fn new(value: f64) -> Self {
        Self { value, as_of: None }
    }

    pub fn dated(value: f64, as_of: NaiveDate) -> Self {
        Self {
            value,
            as_of: Some(as_of),
        }
    }
}

/// One concrete way of obtaining an indicator's value.
///
/// Authentication and parsing stay inside the implementation; the resolver
/// only sees a value or a classified [`FetchError`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human-readable source name recorded in the reading's provenance.
    fn name(&self) -> &str;

    fn method(&self) -> FetchMethod;

    /// Page a reader can open to check the value.
    fn source_url(&self) -> String;

    async fn fetch(&self, spec: &IndicatorSpec) -> Result<Observation, FetchError>;
}

/// Supplies the ordered tier list for an indicator.
pub trait ProviderRegistry: Send + Sync {
    fn tiers(&self, spec: &IndicatorSpec) -> Vec<Arc<dyn Provider>>;
}

/// Builds HTTP-backed providers from tier configuration.
///
/// All providers share one `reqwest::Client` (and its cookie jar) and one
/// Yahoo session.
pub struct ProviderFactory {
    client: reqwest::Client,
    config: ProvidersConfig,
    fred_api_key: Option<String>,
    csv_lookback_days: i64,
    yahoo: Arc<YahooSession>,
}

impl ProviderFactory {
    pub fn new(config: &ProvidersConfig, csv_lookback_days: i64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::Permanent(format!("HTTP client: {e}")))?;

        let fred_api_key = std::env::var(&config.fred_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if fred_api_key.is_none() {
            debug!(
                env = %config.fred_api_key_env,
                "FRED API key not set; fred_api tiers will be skipped"
            );
        }

        Ok(Self::with_client(client, config, fred_api_key, csv_lookback_days))
    }

    /// Use an existing client and an explicit API key. Used by tests.
    pub fn with_client(
        client: reqwest::Client,
        config: &ProvidersConfig,
        fred_api_key: Option<String>,
        csv_lookback_days: i64,
    ) -> Self {
        let yahoo = Arc::new(YahooSession::new(
            client.clone(),
            &config.yahoo_url,
            &config.yahoo_cookie_url,
            Duration::from_secs(600),
        ));
        Self {
            client,
            config: config.clone(),
            fred_api_key,
            csv_lookback_days,
            yahoo,
        }
    }

    pub fn provider(&self, tier: &TierConfig) -> Arc<dyn Provider> {
        match tier {
            TierConfig::FredApi { series } => Arc::new(FredApiProvider::new(
                self.client.clone(),
                &self.config.fred_api_url,
                self.fred_api_key.clone(),
                series,
            )),
            TierConfig::FredCsv { series } => Arc::new(FredCsvProvider::new(
                self.client.clone(),
                &self.config.fred_csv_url,
                series,
                self.csv_lookback_days,
            )),
            TierConfig::Yahoo { symbol, field } => {
                Arc::new(YahooProvider::new(self.yahoo.clone(), symbol, field))
            }
            TierConfig::Scrape {
                url,
                markers,
                min_value,
            } => Arc::new(ScrapeProvider::new(
                self.client.clone(),
                url,
                markers.clone(),
                *min_value,
            )),
        }
    }
}

impl ProviderRegistry for ProviderFactory {
    fn tiers(&self, spec: &IndicatorSpec) -> Vec<Arc<dyn Provider>> {
        spec.tiers.iter().map(|tier| self.provider(tier)).collect()
    }
}

/// Map a non-success HTTP status to an error, or pass the response through.
pub(crate) fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Http(status.as_u16()))
    }
}

pub(crate) fn fred_series_url(series: &str) -> String {
    format!("https://fred.stlouisfed.org/series/{series}")
}
