use std::time::{Duration, Instant};

use async_trait::async_trait;
use macroswarm_models::{FetchMethod, IndicatorSpec};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use super::{check_status, Observation, Provider};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct QuoteEnvelope {
    #[serde(rename = "quoteResponse")]
    quote_response: QuoteResponse,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    result: Vec<serde_json::Value>,
}

struct Crumb {
    value: String,
    obtained_at: Instant,
}

/// Cookie + crumb session for the Yahoo Finance quote API.
///
/// The cookie lives in the shared client's jar; the crumb is cached here for
/// `ttl` and dropped after any failed quote so the next call re-authenticates.
pub struct YahooSession {
    client: reqwest::Client,
    base_url: String,
    cookie_url: String,
    ttl: Duration,
    crumb: Mutex<Option<Crumb>>,
}

impl YahooSession {
    pub fn new(client: reqwest::Client, base_url: &str, cookie_url: &str, ttl: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_url: cookie_url.to_string(),
            ttl,
            crumb: Mutex::new(None),
        }
    }

    async fn crumb(&self) -> Result<String, FetchError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            if crumb.obtained_at.elapsed() < self.ttl {
                return Ok(crumb.value.clone());
            }
        }

        // fc.yahoo.com answers 404 but sets the session cookie.
        if let Err(e) = self.client.get(&self.cookie_url).send().await {
            debug!(error = %e, "Yahoo cookie request failed");
        }

        let response = self
            .client
            .get(format!("{}/v1/test/getcrumb", self.base_url))
            .send()
            .await?;
        let value = check_status(response)?.text().await?.trim().to_string();
        if value.is_empty() || value.contains('<') {
            return Err(FetchError::Transient("Yahoo returned an invalid crumb".to_string()));
        }

        *cached = Some(Crumb {
            value: value.clone(),
            obtained_at: Instant::now(),
        });
        Ok(value)
    }

    async fn reset(&self) {
        self.crumb.lock().await.take();
    }

    /// Numeric `field` of the first quote for `symbol`.
    pub async fn quote_field(&self, symbol: &str, field: &str) -> Result<f64, FetchError> {
        let result = self.try_quote_field(symbol, field).await;
        if result.is_err() {
            self.reset().await;
        }
        result
    }

    async fn try_quote_field(&self, symbol: &str, field: &str) -> Result<f64, FetchError> {
        let crumb = self.crumb().await?;
        let response = self
            .client
            .get(format!("{}/v7/finance/quote", self.base_url))
            .query(&[("symbols", symbol), ("crumb", crumb.as_str())])
            .send()
            .await?;

        // A rejected crumb is recoverable: the session is rebuilt on the next attempt.
        if matches!(response.status().as_u16(), 401 | 403) {
            return Err(FetchError::Transient(format!(
                "Yahoo rejected session (HTTP {})",
                response.status().as_u16()
            )));
        }

        let envelope: QuoteEnvelope = check_status(response)?
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("Yahoo response: {e}")))?;
        let quote = envelope
            .quote_response
            .result
            .first()
            .ok_or_else(|| FetchError::Transient(format!("no quote for {symbol}")))?;

        quote
            .get(field)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| FetchError::Permanent(format!("{symbol} quote has no numeric {field}")))
    }
}

/// One field of a Yahoo Finance quote, e.g. `DX-Y.NYB` / `regularMarketPrice`.
pub struct YahooProvider {
    session: std::sync::Arc<YahooSession>,
    symbol: String,
    field: String,
}

impl YahooProvider {
    pub fn new(session: std::sync::Arc<YahooSession>, symbol: &str, field: &str) -> Self {
        Self {
            session,
            symbol: symbol.to_string(),
            field: field.to_string(),
        }
    }
}

#[async_trait]
impl Provider for YahooProvider {
    fn name(&self) -> &str {
        "Yahoo Finance"
    }

    fn method(&self) -> FetchMethod {
        FetchMethod::Yahoo
    }

    fn source_url(&self) -> String {
        format!(
            "https://finance.yahoo.com/quote/{}",
            self.symbol.replace('^', "%5E")
        )
    }

    async fn fetch(&self, _spec: &IndicatorSpec) -> Result<Observation, FetchError> {
        self.session
            .quote_field(&self.symbol, &self.field)
            .await
            .map(Observation::new)
    }
}
