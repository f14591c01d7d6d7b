use std::collections::BTreeMap;

use async_trait::async_trait;
use macroswarm_models::{
    AgentSpec, AgentVote, DerivedKind, Dimension, MacroConfig, Reading, ReadingSet, Signal,
    Threshold,
};

use crate::error::AgentError;

/// A classifier covering one macro dimension. Mockable for testing.
#[async_trait]
pub trait ClassifierAgent: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> Dimension;
    /// Static synthesis weight.
    fn weight(&self) -> f64;

    async fn evaluate(&self, readings: &ReadingSet) -> Result<AgentVote, AgentError>;
}

/// Majority vote over member signals. Ties resolve to NEUTRAL; confidence is
/// the share of members holding the winning signal.
pub fn majority(signals: &[Signal]) -> (Signal, f64) {
    if signals.is_empty() {
        return (Signal::Neutral, 0.0);
    }
    let count = |target: Signal| signals.iter().filter(|s| **s == target).count();
    let tally = [
        (Signal::Bullish, count(Signal::Bullish)),
        (Signal::Neutral, count(Signal::Neutral)),
        (Signal::Bearish, count(Signal::Bearish)),
    ];

    let top = tally.iter().map(|(_, n)| *n).max().unwrap_or(0);
    let leaders: Vec<Signal> = tally
        .iter()
        .filter(|(_, n)| *n == top)
        .map(|(s, _)| *s)
        .collect();
    let winner = match leaders.as_slice() {
        [only] => *only,
        _ => Signal::Neutral,
    };

    (winner, count(winner) as f64 / signals.len() as f64)
}

/// Threshold-driven agent built entirely from configuration.
///
/// Members without a threshold are context inputs: they must be present and
/// finite, are reported with a NEUTRAL signal, and do not vote. Confidence is
/// taken over every member, context inputs included.
pub struct RuleAgent {
    spec: AgentSpec,
    thresholds: BTreeMap<String, Threshold>,
    derived: BTreeMap<String, DerivedKind>,
}

impl RuleAgent {
    pub fn new(
        spec: AgentSpec,
        thresholds: BTreeMap<String, Option<Threshold>>,
        derived: BTreeMap<String, DerivedKind>,
    ) -> Self {
        let thresholds = thresholds
            .into_iter()
            .filter(|(key, _)| spec.members.contains(key))
            .filter_map(|(key, t)| t.map(|t| (key, t)))
            .collect();
        let derived = derived
            .into_iter()
            .filter(|(key, _)| spec.members.contains(key))
            .collect();
        Self {
            spec,
            thresholds,
            derived,
        }
    }

    pub fn from_config(spec: AgentSpec, config: &MacroConfig) -> Self {
        let derived = config
            .derived
            .iter()
            .map(|d| (d.key.clone(), d.kind))
            .collect();
        Self::new(spec, config.thresholds(), derived)
    }

    /// One agent per configured dimension, in configuration order.
    pub fn from_config_all(config: &MacroConfig) -> Vec<RuleAgent> {
        config
            .swarm
            .agents
            .iter()
            .map(|spec| Self::from_config(spec.clone(), config))
            .collect()
    }

    pub fn members(&self) -> &[String] {
        &self.spec.members
    }

    fn formula(&self) -> Option<String> {
        if let Some(formula) = &self.spec.formula {
            return Some(formula.clone());
        }
        let formulas: Vec<&str> = self.derived.values().map(|kind| kind.formula()).collect();
        (!formulas.is_empty()).then(|| formulas.join("; "))
    }

    fn summary(&self, readings: &ReadingSet) -> Option<String> {
        let parts: Vec<String> = self
            .derived
            .values()
            .filter_map(|kind| kind.explain(readings))
            .collect();
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

#[async_trait]
impl ClassifierAgent for RuleAgent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn dimension(&self) -> Dimension {
        self.spec.dimension
    }

    fn weight(&self) -> f64 {
        self.spec.weight
    }

    async fn evaluate(&self, readings: &ReadingSet) -> Result<AgentVote, AgentError> {
        let mut members: Vec<Reading> = Vec::with_capacity(self.spec.members.len());
        let mut signals = Vec::new();

        for key in &self.spec.members {
            let reading = readings
                .get(key)
                .ok_or_else(|| AgentError::MissingInput(key.clone()))?;
            if !reading.value.is_finite() {
                return Err(AgentError::NonFinite {
                    key: key.clone(),
                    value: reading.value,
                });
            }

            let mut reading = reading.clone();
            reading.signal = match self.thresholds.get(key) {
                Some(threshold) => {
                    let signal = threshold.classify(reading.value);
                    signals.push(signal);
                    signal
                }
                None => Signal::Neutral,
            };
            members.push(reading);
        }

        // Context members count toward the denominator as NEUTRAL.
        let (signal, _) = majority(&signals);
        let agreeing = members.iter().filter(|r| r.signal == signal).count();
        let confidence = if members.is_empty() {
            0.0
        } else {
            agreeing as f64 / members.len() as f64
        };
        let mut vote = AgentVote::valid(
            self.spec.name.clone(),
            self.spec.dimension,
            signal,
            confidence,
            members,
        );
        if let Some(formula) = self.formula() {
            vote = vote.with_formula(formula);
        }
        if let Some(summary) = self.summary(readings) {
            vote = vote.with_summary(summary);
        }
        Ok(vote)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Utc;
    use macroswarm_models::{FetchMethod, Provenance};

    /// Mock classifier for testing the orchestrator without readings.
    pub struct MockClassifier {
        pub name: String,
        pub dimension: Dimension,
        pub weight: f64,
        pub signal: Signal,
        pub confidence: f64,
        pub delay: Duration,
        pub should_fail: bool,
        pub should_panic: bool,
    }

    impl MockClassifier {
        pub fn new(
            name: &str,
            dimension: Dimension,
            weight: f64,
            signal: Signal,
            confidence: f64,
        ) -> Self {
            Self {
                name: name.to_string(),
                dimension,
                weight,
                signal,
                confidence,
                delay: Duration::ZERO,
                should_fail: false,
                should_panic: false,
            }
        }

        pub fn failing(name: &str, dimension: Dimension, weight: f64) -> Self {
            let mut mock = Self::new(name, dimension, weight, Signal::Neutral, 0.0);
            mock.should_fail = true;
            mock
        }

        pub fn panicking(name: &str, dimension: Dimension, weight: f64) -> Self {
            let mut mock = Self::new(name, dimension, weight, Signal::Neutral, 0.0);
            mock.should_panic = true;
            mock
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl ClassifierAgent for MockClassifier {
        fn name(&self) -> &str {
            &self.name
        }

        fn dimension(&self) -> Dimension {
            self.dimension
        }

        fn weight(&self) -> f64 {
            self.weight
        }

        async fn evaluate(&self, _readings: &ReadingSet) -> Result<AgentVote, AgentError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.should_panic {
                panic!("mock classifier panic");
            }
            if self.should_fail {
                return Err(AgentError::MissingInput("MOCK".to_string()));
            }
            Ok(AgentVote::valid(
                self.name.clone(),
                self.dimension,
                self.signal,
                self.confidence,
                vec![],
            ))
        }
    }

    pub fn reading(key: &str, value: f64, is_live: bool) -> Reading {
        Reading {
            key: key.to_string(),
            name: key.to_string(),
            value,
            unit: String::new(),
            signal: Signal::Neutral,
            provenance: Provenance {
                source_name: "test".to_string(),
                source_url: String::new(),
                method: if is_live {
                    FetchMethod::FredApi
                } else {
                    FetchMethod::Fallback
                },
            },
            is_live,
            fetched_at: Utc::now(),
        }
    }

    fn risk_agent() -> RuleAgent {
        let config = MacroConfig::default();
        let spec = config
            .swarm
            .agents
            .iter()
            .find(|a| a.dimension == Dimension::RiskSentiment)
            .unwrap()
            .clone();
        RuleAgent::from_config(spec, &config)
    }

    #[test]
    fn majority_picks_largest_count() {
        let (signal, confidence) =
            majority(&[Signal::Bullish, Signal::Bullish, Signal::Bearish]);
        assert_eq!(signal, Signal::Bullish);
        assert!((confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn majority_tie_is_neutral() {
        let (signal, confidence) = majority(&[Signal::Bullish, Signal::Bearish]);
        assert_eq!(signal, Signal::Neutral);
        assert_eq!(confidence, 0.0);

        let (signal, confidence) = majority(&[
            Signal::Bullish,
            Signal::Neutral,
            Signal::Neutral,
            Signal::Bullish,
        ]);
        assert_eq!(signal, Signal::Neutral);
        assert_eq!(confidence, 0.5);
    }

    #[test]
    fn majority_of_nothing_is_neutral_with_zero_confidence() {
        assert_eq!(majority(&[]), (Signal::Neutral, 0.0));
    }

    #[tokio::test]
    async fn risk_agent_classifies_by_configured_thresholds() {
        let readings: ReadingSet = [
            reading("VIX", 12.0, true),
            reading("HY_OAS", 2.5, true),
            reading("T10Y2Y", 0.66, true),
            reading("DXY", 110.0, false),
        ]
        .into_iter()
        .collect();

        let vote = risk_agent().evaluate(&readings).await.unwrap();
        assert_eq!(vote.dimension, Dimension::RiskSentiment);
        assert!(vote.error.is_none());
        assert!((0.0..=1.0).contains(&vote.confidence));
        assert_eq!(vote.readings.len(), 4);
        assert_eq!(
            vote.formula.as_deref(),
            Some("Risk = f(VIX, HY_OAS, Yield Curve, DXY)")
        );

        let vix = vote.readings.iter().find(|r| r.key == "VIX").unwrap();
        assert_eq!(vix.signal, Signal::Bullish);
        let dxy = vote.readings.iter().find(|r| r.key == "DXY").unwrap();
        assert_eq!(dxy.signal, Signal::Bearish);
    }

    #[tokio::test]
    async fn missing_member_is_an_error() {
        let readings: ReadingSet = [
            reading("VIX", 12.0, true),
            reading("HY_OAS", 2.5, true),
            reading("T10Y2Y", 0.66, true),
        ]
        .into_iter()
        .collect();

        let err = risk_agent().evaluate(&readings).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingInput(ref key) if key == "DXY"));
    }

    #[tokio::test]
    async fn non_finite_member_is_an_error() {
        let readings: ReadingSet = [
            reading("VIX", f64::NAN, true),
            reading("HY_OAS", 2.5, true),
            reading("T10Y2Y", 0.66, true),
            reading("DXY", 100.0, true),
        ]
        .into_iter()
        .collect();

        let err = risk_agent().evaluate(&readings).await.unwrap_err();
        assert!(matches!(err, AgentError::NonFinite { ref key, .. } if key == "VIX"));
    }

    #[tokio::test]
    async fn context_members_do_not_vote() {
        let config = MacroConfig::default();
        let spec = config
            .swarm
            .agents
            .iter()
            .find(|a| a.dimension == Dimension::Liquidity)
            .unwrap()
            .clone();
        let agent = RuleAgent::from_config(spec, &config);

        // NET_LIQUIDITY is the only voting member here.
        let readings: ReadingSet = [
            reading("WALCL", 6_700_000.0, true),
            reading("TGA", 800_000.0, true),
            reading("RRP", 2.0, true),
            reading("NET_LIQUIDITY", 6.2, true),
        ]
        .into_iter()
        .collect();

        let vote = agent.evaluate(&readings).await.unwrap();
        assert_eq!(vote.signal, Some(Signal::Bullish));
        assert_eq!(vote.confidence, 0.25);
        assert!(vote.summary.unwrap().starts_with("Net Liquidity $5.90T"));
    }

    #[tokio::test]
    async fn neutral_winner_counts_context_members_as_agreeing() {
        let config = MacroConfig::default();
        let spec = config
            .swarm
            .agents
            .iter()
            .find(|a| a.dimension == Dimension::Liquidity)
            .unwrap()
            .clone();
        let agent = RuleAgent::from_config(spec, &config);

        // Between the NET_LIQUIDITY bands, so every member reads NEUTRAL.
        let readings: ReadingSet = [
            reading("WALCL", 6_700_000.0, true),
            reading("TGA", 800_000.0, true),
            reading("RRP", 2.0, true),
            reading("NET_LIQUIDITY", 5.75, true),
        ]
        .into_iter()
        .collect();

        let vote = agent.evaluate(&readings).await.unwrap();
        assert_eq!(vote.signal, Some(Signal::Neutral));
        assert_eq!(vote.confidence, 1.0);
    }
}
