use std::fmt;

use serde::{Deserialize, Serialize};

use crate::reading::Reading;
use crate::signal::Signal;

/// The macro dimension an agent covers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Dimension {
    Liquidity,
    Valuation,
    RiskSentiment,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dimension::Liquidity => "LIQUIDITY",
            Dimension::Valuation => "VALUATION",
            Dimension::RiskSentiment => "RISK_SENTIMENT",
        };
        f.write_str(s)
    }
}

/// A dimension-level vote from one classifier agent.
///
/// `signal` and `error` are mutually exclusive; build votes through
/// [`AgentVote::valid`] or [`AgentVote::errored`] to keep it that way.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentVote {
    pub agent_name: String,
    pub dimension: Dimension,
    pub signal: Option<Signal>,
    /// 0.0 to 1.0 share of members agreeing with `signal`.
    pub confidence: f64,
    pub formula: Option<String>,
    pub summary: Option<String>,
    pub error: Option<String>,
    pub readings: Vec<Reading>,
}

impl AgentVote {
    pub fn valid(
        agent_name: impl Into<String>,
        dimension: Dimension,
        signal: Signal,
        confidence: f64,
        readings: Vec<Reading>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            dimension,
            signal: Some(signal),
            confidence: bounded_confidence(confidence),
            formula: None,
            summary: None,
            error: None,
            readings,
        }
    }

    pub fn errored(
        agent_name: impl Into<String>,
        dimension: Dimension,
        error: impl Into<String>,
        readings: Vec<Reading>,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            dimension,
            signal: None,
            confidence: 0.0,
            formula: None,
            summary: None,
            error: Some(error.into()),
            readings,
        }
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Confidence as used in synthesis: within [0, 1], non-finite as 0.
    pub fn effective_confidence(&self) -> f64 {
        bounded_confidence(self.confidence)
    }

    /// The signal, only when the vote may take part in synthesis.
    pub fn usable_signal(&self) -> Option<Signal> {
        match self.error {
            Some(_) => None,
            None => self.signal,
        }
    }
}

fn bounded_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
