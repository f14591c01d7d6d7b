use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use macroswarm_models::{
    DerivedSpec, FetchMethod, IndicatorSpec, Provenance, Reading, ReadingSet, Signal,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::providers::ProviderRegistry;
use crate::resolver::SourceResolver;

/// Resolves every configured indicator concurrently, then computes the
/// derived ones from the results.
pub struct FactorFetcher {
    indicators: Arc<Vec<IndicatorSpec>>,
    derived: Vec<DerivedSpec>,
    workers: usize,
    resolver: Arc<SourceResolver>,
    registry: Arc<dyn ProviderRegistry>,
}

impl FactorFetcher {
    pub fn new(
        indicators: Vec<IndicatorSpec>,
        derived: Vec<DerivedSpec>,
        workers: usize,
        resolver: Arc<SourceResolver>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Self {
        Self {
            indicators: Arc::new(indicators),
            derived,
            workers: workers.max(1),
            resolver,
            registry,
        }
    }

    pub fn resolver(&self) -> &Arc<SourceResolver> {
        &self.resolver
    }

    /// One reading per configured indicator and derived indicator. Never partial.
    pub async fn run(&self) -> ReadingSet {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for index in 0..self.indicators.len() {
            let indicators = self.indicators.clone();
            let resolver = self.resolver.clone();
            let registry = self.registry.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let spec = &indicators[index];
                let tiers = registry.tiers(spec);
                resolver.resolve(spec, &tiers).await
            });
        }

        let mut readings = ReadingSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(reading) => readings.insert(reading),
                Err(e) => error!(error = %e, "Resolver task failed"),
            }
        }

        for spec in self.indicators.iter() {
            if !readings.contains(&spec.key) {
                warn!(indicator = %spec.key, "No reading after resolution, serving fallback");
                readings.insert(self.resolver.fallback(spec));
            }
        }

        for spec in &self.derived {
            let reading = derive(spec, &readings);
            readings.insert(reading);
        }

        info!(
            readings = readings.len(),
            live = readings.live_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetch run complete"
        );
        readings
    }
}

/// Compute a derived reading. Live only if every component is live.
pub fn derive(spec: &DerivedSpec, readings: &ReadingSet) -> Reading {
    let value = spec.kind.compute(readings);
    let is_live = spec
        .kind
        .components()
        .iter()
        .all(|key| readings.get(key).is_some_and(|r| r.is_live));
    let signal = match spec.threshold {
        Some(threshold) if value.is_finite() => threshold.classify(value),
        _ => Signal::Neutral,
    };
    if !value.is_finite() {
        warn!(indicator = %spec.key, "Derived value is not finite");
    }

    Reading {
        key: spec.key.clone(),
        name: spec.name.clone(),
        value,
        unit: spec.unit.clone(),
        signal,
        provenance: Provenance {
            source_name: spec.kind.formula().to_string(),
            source_url: String::new(),
            method: FetchMethod::Computed,
        },
        is_live,
        fetched_at: Utc::now(),
    }
}
