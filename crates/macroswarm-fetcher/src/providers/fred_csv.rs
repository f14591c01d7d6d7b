use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use macroswarm_models::{FetchMethod, IndicatorSpec};

use super::fred_api::parse_fred_value;
use super::{check_status, fred_series_url, Observation, Provider};
use crate::error::FetchError;

/// Last row with a usable value, e.g. from
///
/// ```text
/// observation_date,DGS10
/// 2026-02-10,4.18
/// 2026-02-11,4.16
/// 2026-02-12,.
/// ```
pub(crate) fn last_valid_row(csv: &str) -> Option<(NaiveDate, f64)> {
    csv.lines()
        .skip(1)
        .filter_map(|line| {
            let (date, value) = line.split_once(',')?;
            let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
            Some((date, parse_fred_value(value)?))
        })
        .last()
}

/// FRED graph CSV download. No key needed.
pub struct FredCsvProvider {
    client: reqwest::Client,
    base_url: String,
    series: String,
    lookback_days: i64,
}

impl FredCsvProvider {
    pub fn new(client: reqwest::Client, base_url: &str, series: &str, lookback_days: i64) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
            series: series.to_string(),
            lookback_days,
        }
    }
}

#[async_trait]
impl Provider for FredCsvProvider {
    fn name(&self) -> &str {
        "FRED CSV"
    }

    fn method(&self) -> FetchMethod {
        FetchMethod::FredCsv
    }

    fn source_url(&self) -> String {
        fred_series_url(&self.series)
    }

    async fn fetch(&self, _spec: &IndicatorSpec) -> Result<Observation, FetchError> {
        let end = Utc::now().date_naive();
        let start = end - Duration::days(self.lookback_days);

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("id", self.series.clone()),
                ("cosd", start.format("%Y-%m-%d").to_string()),
                ("coed", end.format("%Y-%m-%d").to_string()),
            ])
            .send()
            .await?;
        let body = check_status(response)?.text().await?;

        last_valid_row(&body)
            .map(|(date, value)| Observation::dated(value, date))
            .ok_or_else(|| FetchError::Transient(format!("no valid {} rows in CSV", self.series)))
    }
}
