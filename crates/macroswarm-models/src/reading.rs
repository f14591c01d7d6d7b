use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

/// How a reading was obtained. Also the grouping key for source health.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FetchMethod {
    FredApi,
    FredCsv,
    Yahoo,
    Scrape,
    Fallback,
    Computed,
}

impl FetchMethod {
    pub const ALL: [FetchMethod; 6] = [
        FetchMethod::FredApi,
        FetchMethod::FredCsv,
        FetchMethod::Yahoo,
        FetchMethod::Scrape,
        FetchMethod::Fallback,
        FetchMethod::Computed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FetchMethod::FredApi => "fred_api",
            FetchMethod::FredCsv => "fred_csv",
            FetchMethod::Yahoo => "yahoo",
            FetchMethod::Scrape => "scrape",
            FetchMethod::Fallback => "fallback",
            FetchMethod::Computed => "computed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == s)
    }
}

impl fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a value came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provenance {
    pub source_name: String,
    pub source_url: String,
    pub method: FetchMethod,
}

/// One resolved value for one indicator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub key: String,
    pub name: String,
    pub value: f64,
    pub unit: String,
    pub signal: Signal,
    pub provenance: Provenance,
    /// False only for values served by the static fallback tier (or computed from one).
    pub is_live: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Reading {
    /// Drill-down label, e.g. `VIX (17.79)` or `Net Liquidity (5.70T)`.
    pub fn label(&self) -> String {
        format!("{} ({}{})", self.name, format_value(self.value), self.unit_suffix())
    }

    fn unit_suffix(&self) -> &str {
        match self.unit.as_str() {
            "%" | "T" | "B" | "x" => &self.unit,
            _ => "",
        }
    }
}

fn format_value(value: f64) -> String {
    if value.abs() >= 1000.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// The total mapping of indicator key to reading produced by one fetch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReadingSet {
    readings: BTreeMap<String, Reading>,
}

impl ReadingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reading: Reading) {
        self.readings.insert(reading.key.clone(), reading);
    }

    pub fn get(&self, key: &str) -> Option<&Reading> {
        self.readings.get(key)
    }

    /// Value of `key` if present and finite.
    pub fn finite_value(&self, key: &str) -> Option<f64> {
        self.get(key).map(|r| r.value).filter(|v| v.is_finite())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.readings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.readings.values()
    }

    pub fn live_count(&self) -> usize {
        self.iter().filter(|r| r.is_live).count()
    }
}

impl FromIterator<Reading> for ReadingSet {
    fn from_iter<I: IntoIterator<Item = Reading>>(iter: I) -> Self {
        let mut set = ReadingSet::new();
        for reading in iter {
            set.insert(reading);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(key: &str, value: f64, unit: &str, is_live: bool) -> Reading {
        Reading {
            key: key.to_string(),
            name: key.to_string(),
            value,
            unit: unit.to_string(),
            signal: Signal::Neutral,
            provenance: Provenance {
                source_name: "test".to_string(),
                source_url: String::new(),
                method: FetchMethod::FredCsv,
            },
            is_live,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn fetch_method_roundtrip() {
        for method in FetchMethod::ALL {
            assert_eq!(FetchMethod::parse(method.as_str()), Some(method));
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", method.as_str()));
        }
        assert_eq!(FetchMethod::parse("carrier_pigeon"), None);
    }

    #[test]
    fn reading_labels() {
        assert_eq!(reading("VIX", 17.79, "", true).label(), "VIX (17.79)");
        assert_eq!(reading("HY_OAS", 2.86, "%", true).label(), "HY_OAS (2.86%)");
        assert_eq!(
            reading("WALCL", 6_605_909.0, "Millions USD", true).label(),
            "WALCL (6605909)"
        );
    }

    #[test]
    fn reading_set_lookup_and_counts() {
        let set: ReadingSet = vec![
            reading("VIX", 17.0, "", true),
            reading("DXY", 96.9, "", false),
            reading("ERP", f64::NAN, "%", false),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 3);
        assert_eq!(set.live_count(), 1);
        assert_eq!(set.finite_value("VIX"), Some(17.0));
        assert_eq!(set.finite_value("ERP"), None);
        assert_eq!(set.finite_value("MISSING"), None);
        assert!(set.contains("DXY"));
    }
}
