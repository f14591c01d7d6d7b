use chrono::{NaiveDate, Utc};
use macroswarm_models::IndicatorSpec;
use tracing::warn;

use super::Observation;

/// Terminal tier: the configured last-known snapshot. Cannot fail.
#[derive(Debug, Clone)]
pub struct StaticFallback {
    max_age_days: i64,
}

impl StaticFallback {
    pub const SOURCE_NAME: &'static str = "Static fallback";

    pub fn new(max_age_days: i64) -> Self {
        Self { max_age_days }
    }

    pub fn is_stale(&self, as_of: NaiveDate, today: NaiveDate) -> bool {
        (today - as_of).num_days() > self.max_age_days
    }

    pub fn observe(&self, spec: &IndicatorSpec) -> Observation {
        let fallback = &spec.fallback;
        let today = Utc::now().date_naive();
        if self.is_stale(fallback.as_of, today) {
            warn!(
                indicator = %spec.key,
                as_of = %fallback.as_of,
                age_days = (today - fallback.as_of).num_days(),
                "Serving stale fallback snapshot; refresh the configured value"
            );
        }
        Observation::dated(fallback.value, fallback.as_of)
    }
}
