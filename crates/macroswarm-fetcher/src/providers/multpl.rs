use async_trait::async_trait;
use macroswarm_models::{FetchMethod, IndicatorSpec};

use super::{check_status, Observation, Provider};
use crate::error::FetchError;

/// First decimal number (`digits.digits`) after `marker`, skipping markup.
pub(crate) fn decimal_after(html: &str, marker: &str) -> Option<f64> {
    let start = html.find(marker)? + marker.len();
    let bytes = html[start..].as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let begin = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                return html[start + begin..start + i].parse().ok();
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Scrapes a number from an HTML page, trying each marker in order.
pub struct ScrapeProvider {
    client: reqwest::Client,
    url: String,
    markers: Vec<String>,
    min_value: Option<f64>,
}

impl ScrapeProvider {
    pub fn new(
        client: reqwest::Client,
        url: &str,
        markers: Vec<String>,
        min_value: Option<f64>,
    ) -> Self {
        Self {
            client,
            url: url.to_string(),
            markers,
            min_value,
        }
    }

    fn extract(&self, html: &str) -> Option<f64> {
        self.markers
            .iter()
            .filter_map(|marker| decimal_after(html, marker))
            .find(|value| self.min_value.map_or(true, |min| *value > min))
    }
}

#[async_trait]
impl Provider for ScrapeProvider {
    fn name(&self) -> &str {
        "multpl.com"
    }

    fn method(&self) -> FetchMethod {
        FetchMethod::Scrape
    }

    fn source_url(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self, _spec: &IndicatorSpec) -> Result<Observation, FetchError> {
        let response = self.client.get(&self.url).send().await?;
        let html = check_status(response)?.text().await?;

        self.extract(&html)
            .map(Observation::new)
            .ok_or_else(|| FetchError::Permanent(format!("no value found on {}", self.url)))
    }
}
