use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::reading::FetchMethod;

/// One provider attempt. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthRecord {
    pub indicator: String,
    pub method: FetchMethod,
    pub success: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl HealthRecord {
    pub fn success(indicator: &str, method: FetchMethod, latency_ms: u64) -> Self {
        Self {
            indicator: indicator.to_string(),
            method,
            success: true,
            latency_ms,
            error: None,
            attempted_at: Utc::now(),
        }
    }

    pub fn failure(
        indicator: &str,
        method: FetchMethod,
        latency_ms: u64,
        error: impl Into<String>,
    ) -> Self {
        Self {
            indicator: indicator.to_string(),
            method,
            success: false,
            latency_ms,
            error: Some(error.into()),
            attempted_at: Utc::now(),
        }
    }
}

/// Rolling aggregate for one fetch method.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MethodHealth {
    pub total: u64,
    pub successes: u64,
    /// `None` when there were no attempts in the window.
    pub avg_latency_ms: Option<f64>,
    /// `None` when there were no attempts in the window.
    pub success_rate: Option<f64>,
}

impl MethodHealth {
    /// Build an aggregate from raw sums. Never divides by zero.
    pub fn from_totals(total: u64, successes: u64, latency_sum_ms: u64) -> Self {
        if total == 0 {
            return Self::default();
        }
        Self {
            total,
            successes,
            avg_latency_ms: Some(latency_sum_ms as f64 / total as f64),
            success_rate: Some(successes as f64 / total as f64),
        }
    }
}
