use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use macroswarm_cache::DurableStore;
use macroswarm_fetcher::FactorFetcher;
use macroswarm_models::report::REPORT_SCHEMA_VERSION;
use macroswarm_models::{
    AgentVote, CompositeReport, ReadingSet, Signal, SignalBands, VoteCounts,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::ClassifierAgent;
use crate::error::AgentError;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;

/// Result of a trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(CompositeReport),
    /// Another run held the slot; this trigger was rejected, not queued.
    AlreadyRunning,
}

impl RunOutcome {
    pub fn report(self) -> Option<CompositeReport> {
        match self {
            RunOutcome::Completed(report) => Some(report),
            RunOutcome::AlreadyRunning => None,
        }
    }
}

/// Returns the run slot to Idle when dropped, including on panic.
struct RunGuard<'a>(&'a AtomicU8);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(IDLE, Ordering::Release);
    }
}

/// Fetches every indicator, dispatches the classifier agents, and
/// synthesizes their votes into a CompositeReport.
pub struct SwarmOrchestrator {
    fetcher: Arc<FactorFetcher>,
    agents: Vec<Arc<dyn ClassifierAgent>>,
    bands: SignalBands,
    store: Option<Arc<dyn DurableStore>>,
    state: AtomicU8,
}

impl SwarmOrchestrator {
    pub fn new(
        fetcher: Arc<FactorFetcher>,
        agents: Vec<Arc<dyn ClassifierAgent>>,
        bands: SignalBands,
    ) -> Self {
        Self {
            fetcher,
            agents,
            bands,
            store: None,
            state: AtomicU8::new(IDLE),
        }
    }

    /// Append member readings and each report to `store` after every run.
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fetcher(&self) -> &Arc<FactorFetcher> {
        &self.fetcher
    }

    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(&self.state))
    }

    /// One full run. Rejected immediately if a run is already in flight.
    pub async fn run(&self) -> RunOutcome {
        let Some(_guard) = self.try_begin() else {
            info!("Run already in progress, rejecting trigger");
            return RunOutcome::AlreadyRunning;
        };

        let started = Instant::now();
        info!(agents = self.agents.len(), "Swarm run starting");

        let readings = self.fetcher.run().await;
        let mut report = self.evaluate(readings).await;
        report.processing_time_ms = started.elapsed().as_millis() as u64;

        if report.live_count == 0 && report.total_readings() > 0 {
            warn!(
                fallback = report.fallback_count,
                "No live readings this run; every value came from the static fallback"
            );
        }

        match self.persist(&report) {
            Ok(written) if self.store.is_some() => {
                debug!(readings = written, "Run persisted");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to persist run history"),
        }

        info!(
            signal = %report.overall_signal,
            score = report.weighted_score,
            degraded = report.degraded,
            live = report.live_count,
            fallback = report.fallback_count,
            elapsed_ms = report.processing_time_ms,
            "Swarm run complete"
        );
        RunOutcome::Completed(report)
    }

    /// Dispatch every agent over a complete reading set and synthesize.
    /// Does not touch the run slot.
    pub async fn evaluate(&self, readings: ReadingSet) -> CompositeReport {
        let started = Instant::now();
        let readings = Arc::new(readings);

        let mut handles = Vec::new();
        for agent in &self.agents {
            let agent = Arc::clone(agent);
            let readings = Arc::clone(&readings);
            let name = agent.name().to_string();
            let dimension = agent.dimension();
            let weight = agent.weight();

            let handle = tokio::spawn(async move { agent.evaluate(&readings).await });
            handles.push((name, dimension, weight, handle));
        }

        let mut votes = Vec::with_capacity(handles.len());
        for (name, dimension, weight, handle) in handles {
            let vote = match handle.await {
                Ok(Ok(vote)) => {
                    info!(agent = %name, signal = ?vote.signal, confidence = vote.confidence, "Agent voted");
                    vote
                }
                Ok(Err(e)) => {
                    warn!(agent = %name, error = %e, "Agent failed");
                    AgentVote::errored(name, dimension, e.to_string(), vec![])
                }
                Err(e) => {
                    error!(agent = %name, error = %e, "Agent task panicked");
                    AgentVote::errored(name, dimension, format!("agent task failed: {e}"), vec![])
                }
            };
            votes.push((vote, weight));
        }

        synthesize(votes, &self.bands, started.elapsed())
    }

    fn persist(&self, report: &CompositeReport) -> Result<usize, AgentError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut seen = HashSet::new();
        let mut written = 0;
        for reading in report
            .votes
            .iter()
            .filter(|v| v.error.is_none())
            .flat_map(|v| v.readings.iter())
        {
            if !seen.insert(reading.key.as_str()) {
                continue;
            }
            if !reading.value.is_finite() {
                debug!(indicator = %reading.key, "Skipping non-finite reading");
                continue;
            }
            store.append_reading(reading)?;
            written += 1;
        }
        store.append_report(report)?;
        Ok(written)
    }
}

/// Weighted vote over non-errored agents, mapped onto `bands`.
///
/// When no agent produced a usable vote the report is degraded:
/// NEUTRAL with a score of 0.0.
pub fn synthesize(
    votes: Vec<(AgentVote, f64)>,
    bands: &SignalBands,
    elapsed: Duration,
) -> CompositeReport {
    let mut counts = VoteCounts::default();
    let mut numerator = 0.0;
    let mut total_weight = 0.0;

    for (vote, weight) in &votes {
        match vote.usable_signal() {
            Some(signal) => {
                match signal {
                    Signal::Bullish => counts.bullish += 1,
                    Signal::Neutral => counts.neutral += 1,
                    Signal::Bearish => counts.bearish += 1,
                }
                if weight.is_finite() && *weight > 0.0 {
                    numerator += signal.value() * vote.effective_confidence() * weight;
                    total_weight += weight;
                }
            }
            None => counts.errored += 1,
        }
    }

    let degraded = total_weight <= 0.0;
    let weighted_score = if degraded {
        0.0
    } else {
        (numerator / total_weight).clamp(-1.0, 1.0)
    };
    let overall_signal = if degraded {
        Signal::Neutral
    } else {
        bands.classify(weighted_score)
    };
    if degraded {
        warn!(errored = counts.errored, "Degraded run: no usable agent votes");
    }

    let mut bullish_indicators = Vec::new();
    let mut neutral_indicators = Vec::new();
    let mut bearish_indicators = Vec::new();
    let mut live_count = 0;
    let mut fallback_count = 0;
    let mut seen = HashSet::new();

    for reading in votes
        .iter()
        .filter(|(v, _)| v.error.is_none())
        .flat_map(|(v, _)| v.readings.iter())
    {
        if !seen.insert(reading.key.clone()) {
            continue;
        }
        let label = reading.label();
        match reading.signal {
            Signal::Bullish => bullish_indicators.push(label),
            Signal::Neutral => neutral_indicators.push(label),
            Signal::Bearish => bearish_indicators.push(label),
        }
        if reading.is_live {
            live_count += 1;
        } else {
            fallback_count += 1;
        }
    }

    CompositeReport {
        id: Uuid::new_v4(),
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at: Utc::now(),
        overall_signal,
        weighted_score,
        degraded,
        vote_counts: counts,
        bullish_indicators,
        neutral_indicators,
        bearish_indicators,
        live_count,
        fallback_count,
        votes: votes.into_iter().map(|(vote, _)| vote).collect(),
        processing_time_ms: elapsed.as_millis() as u64,
    }
}
