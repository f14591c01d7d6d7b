use async_trait::async_trait;
use chrono::NaiveDate;
use macroswarm_models::{FetchMethod, IndicatorSpec};
use serde::Deserialize;

use super::{check_status, fred_series_url, Observation, Provider};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
struct ObservationsResponse {
    #[serde(default)]
    observations: Vec<FredObservation>,
}

#[derive(Debug, Deserialize)]
struct FredObservation {
    date: String,
    value: String,
}

/// FRED placeholder for a missing observation is ".".
pub(crate) fn parse_fred_value(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "." || raw.eq_ignore_ascii_case("NA") {
        return None;
    }
    raw.parse().ok()
}

/// FRED JSON observations API. Requires an API key.
pub struct FredApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    series: String,
}

impl FredApiProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        series: &str,
    ) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            api_key,
            series: series.to_string(),
        }
    }
}

#[async_trait]
impl Provider for FredApiProvider {
    fn name(&self) -> &str {
        "FRED API"
    }

    fn method(&self) -> FetchMethod {
        FetchMethod::FredApi
    }

    fn source_url(&self) -> String {
        fred_series_url(&self.series)
    }

    async fn fetch(&self, _spec: &IndicatorSpec) -> Result<Observation, FetchError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| FetchError::Permanent("FRED API key not configured".to_string()))?;

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("series_id", self.series.as_str()),
                ("api_key", api_key),
                ("sort_order", "desc"),
                ("limit", "5"),
                ("file_type", "json"),
            ])
            .send()
            .await?;
        let body: ObservationsResponse = check_status(response)?
            .json()
            .await
            .map_err(|e| FetchError::Permanent(format!("FRED response: {e}")))?;

        // Newest first; the most recent rows are often still ".".
        body.observations
            .iter()
            .find_map(|obs| {
                let value = parse_fred_value(&obs.value)?;
                match NaiveDate::parse_from_str(&obs.date, "%Y-%m-%d") {
                    Ok(date) => Some(Observation::dated(value, date)),
                    Err(_) => Some(Observation::new(value)),
                }
            })
            .ok_or_else(|| FetchError::Transient(format!("no valid {} observations", self.series)))
    }
}
