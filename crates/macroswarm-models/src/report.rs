use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::signal::Signal;
use crate::vote::AgentVote;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Agent-level vote tally.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteCounts {
    pub bullish: usize,
    pub neutral: usize,
    pub bearish: usize,
    pub errored: usize,
}

/// The output of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompositeReport {
    pub id: Uuid,
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub overall_signal: Signal,
    /// In [-1.0, 1.0].
    pub weighted_score: f64,
    /// True when no agent produced a usable vote.
    pub degraded: bool,
    pub vote_counts: VoteCounts,
    pub bullish_indicators: Vec<String>,
    pub neutral_indicators: Vec<String>,
    pub bearish_indicators: Vec<String>,
    pub live_count: usize,
    pub fallback_count: usize,
    pub votes: Vec<AgentVote>,
    pub processing_time_ms: u64,
}

impl CompositeReport {
    pub fn total_readings(&self) -> usize {
        self.live_count + self.fallback_count
    }
}
