use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use macroswarm_cache::{CacheLayer, HealthTracker};
use macroswarm_models::store_schema::key_patterns;
use macroswarm_models::{
    CacheConfig, FetchMethod, HealthRecord, IndicatorSpec, Provenance, Reading, RetryConfig,
    Signal,
};
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::providers::fallback::StaticFallback;
use crate::providers::{Observation, Provider};

/// Shared services the resolver consults. Passed explicitly so tests can
/// build isolated instances.
pub struct ResolverContext {
    pub cache: Arc<CacheLayer>,
    pub health: Arc<HealthTracker>,
    pub retry: RetryConfig,
    pub cache_ttls: CacheConfig,
    pub call_timeout: Duration,
    pub fallback: StaticFallback,
}

/// Walks an indicator's tiers in order and returns the first usable value,
/// ending with the static fallback.
pub struct SourceResolver {
    ctx: ResolverContext,
}

impl SourceResolver {
    pub fn new(ctx: ResolverContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ResolverContext {
        &self.ctx
    }

    /// Never fails: if every tier fails the fallback snapshot is returned
    /// with `is_live = false`.
    pub async fn resolve(&self, spec: &IndicatorSpec, tiers: &[Arc<dyn Provider>]) -> Reading {
        for provider in tiers {
            let method = provider.method();
            let key = key_patterns::reading(&spec.key, method);

            match self.ctx.cache.get::<Reading>(&key).await {
                Ok(Some(reading)) if usable(spec, reading.value) => {
                    debug!(indicator = %spec.key, %method, "Cache hit");
                    return reading;
                }
                Ok(_) => {}
                Err(e) => warn!(indicator = %spec.key, %method, error = %e, "Cache read failed"),
            }

            match self.fetch_tier(spec, provider.as_ref()).await {
                Ok(obs) => {
                    let reading = build_reading(
                        spec,
                        obs.value,
                        Provenance {
                            source_name: provider.name().to_string(),
                            source_url: provider.source_url(),
                            method,
                        },
                        true,
                    );
                    if let Err(e) = self
                        .ctx
                        .cache
                        .put(&key, &reading, self.ctx.cache_ttls.ttl_for(method))
                        .await
                    {
                        warn!(indicator = %spec.key, %method, error = %e, "Cache write failed");
                    }
                    info!(
                        indicator = %spec.key,
                        %method,
                        value = reading.value,
                        as_of = ?obs.as_of,
                        "Resolved"
                    );
                    return reading;
                }
                Err(e) => {
                    warn!(indicator = %spec.key, %method, error = %e, "Tier failed, falling through");
                }
            }
        }

        self.fallback(spec)
    }

    /// The terminal tier on its own. Also used when a resolver task dies.
    pub fn fallback(&self, spec: &IndicatorSpec) -> Reading {
        let obs = self.ctx.fallback.observe(spec);
        self.ctx
            .health
            .record(HealthRecord::success(&spec.key, FetchMethod::Fallback, 0));
        warn!(indicator = %spec.key, value = obs.value, "All tiers failed, using static fallback");
        build_reading(
            spec,
            obs.value,
            Provenance {
                source_name: StaticFallback::SOURCE_NAME.to_string(),
                source_url: spec.fallback.source_url.clone(),
                method: FetchMethod::Fallback,
            },
            false,
        )
    }

    async fn fetch_tier(
        &self,
        spec: &IndicatorSpec,
        provider: &dyn Provider,
    ) -> Result<Observation, FetchError> {
        let retry = &self.ctx.retry;
        let mut backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(retry.base_delay_ms))
            .with_factor(retry.multiplier)
            .with_max_delay(Duration::from_millis(retry.max_delay_ms))
            .with_max_times(retry.max_attempts.saturating_sub(1));
        if retry.jitter {
            backoff = backoff.with_jitter();
        }

        (|| self.attempt(spec, provider))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(FetchError::is_transient)
            .notify(|e: &FetchError, delay: Duration| {
                debug!(
                    indicator = %spec.key,
                    method = %provider.method(),
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying"
                );
            })
            .await
    }

    /// One bounded provider call, filtered and recorded to health.
    async fn attempt(
        &self,
        spec: &IndicatorSpec,
        provider: &dyn Provider,
    ) -> Result<Observation, FetchError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.ctx.call_timeout, provider.fetch(spec)).await
        {
            Ok(result) => result.and_then(|obs| validate(spec, obs)),
            Err(_) => Err(FetchError::Transient(format!(
                "timed out after {}ms",
                self.ctx.call_timeout.as_millis()
            ))),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        let record = match &result {
            Ok(_) => HealthRecord::success(&spec.key, provider.method(), latency_ms),
            Err(e) => HealthRecord::failure(&spec.key, provider.method(), latency_ms, e.to_string()),
        };
        self.ctx.health.record(record);
        result
    }
}

fn usable(spec: &IndicatorSpec, value: f64) -> bool {
    value.is_finite()
        && value != 0.0
        && spec.bounds.map_or(true, |bounds| bounds.contains(value))
}

/// Zero, non-finite and implausible values never become readings.
fn validate(spec: &IndicatorSpec, obs: Observation) -> Result<Observation, FetchError> {
    if !obs.value.is_finite() {
        return Err(FetchError::Permanent(format!("non-finite value {}", obs.value)));
    }
    if obs.value == 0.0 {
        return Err(FetchError::ZeroValue);
    }
    if let Some(bounds) = spec.bounds {
        if !bounds.contains(obs.value) {
            return Err(FetchError::OutOfBounds {
                value: obs.value,
                min: bounds.min,
                max: bounds.max,
            });
        }
    }
    Ok(obs)
}

fn build_reading(spec: &IndicatorSpec, value: f64, provenance: Provenance, is_live: bool) -> Reading {
    Reading {
        key: spec.key.clone(),
        name: spec.name.clone(),
        value,
        unit: spec.unit.clone(),
        signal: spec
            .threshold
            .map_or(Signal::Neutral, |threshold| threshold.classify(value)),
        provenance,
        is_live,
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use macroswarm_cache::SqliteStore;

    /// Returns scripted results in order; repeats the last one when exhausted.
    pub(crate) struct ScriptedProvider {
        method: FetchMethod,
        script: Mutex<VecDeque<Result<f64, FetchError>>>,
        last: Result<f64, FetchError>,
        delay: Duration,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedProvider {
        pub(crate) fn new(method: FetchMethod, script: Vec<Result<f64, FetchError>>) -> Arc<Self> {
            let last = script
                .last()
                .cloned()
                .unwrap_or(Err(FetchError::Permanent("empty script".into())));
            Arc::new(Self {
                method,
                script: Mutex::new(script.into()),
                last,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn always(method: FetchMethod, value: f64) -> Arc<Self> {
            Self::new(method, vec![Ok(value)])
        }

        pub(crate) fn slow(method: FetchMethod, value: f64, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                method,
                script: Mutex::new(VecDeque::new()),
                last: Ok(value),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn method(&self) -> FetchMethod {
            self.method
        }

        fn source_url(&self) -> String {
            format!("mock://{}", self.method)
        }

        async fn fetch(&self, _spec: &IndicatorSpec) -> Result<Observation, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.last.clone()).map(Observation::new)
        }
    }

    pub(crate) fn test_context() -> ResolverContext {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        ResolverContext {
            cache: Arc::new(CacheLayer::new(store, 100)),
            health: Arc::new(HealthTracker::new()),
            retry: RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                multiplier: 2.0,
                max_delay_ms: 5,
                jitter: false,
            },
            cache_ttls: CacheConfig::default(),
            call_timeout: Duration::from_millis(200),
            fallback: StaticFallback::new(36_500),
        }
    }

    pub(crate) fn spec(key: &str) -> IndicatorSpec {
        macroswarm_models::catalog::default_indicators()
            .into_iter()
            .find(|i| i.key == key)
            .unwrap()
    }

    #[tokio::test]
    async fn first_successful_tier_wins() {
        let resolver = SourceResolver::new(test_context());
        let first = ScriptedProvider::always(FetchMethod::FredApi, 18.5);
        let second = ScriptedProvider::always(FetchMethod::FredCsv, 30.0);
        let tiers: Vec<Arc<dyn Provider>> = vec![first.clone(), second.clone()];

        let reading = resolver.resolve(&spec("VIX"), &tiers).await;

        assert_eq!(reading.value, 18.5);
        assert!(reading.is_live);
        assert_eq!(reading.provenance.method, FetchMethod::FredApi);
        assert_eq!(reading.signal, Signal::Neutral);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_within_the_tier() {
        let resolver = SourceResolver::new(test_context());
        let flaky = ScriptedProvider::new(
            FetchMethod::FredCsv,
            vec![Err(FetchError::Http(503)), Err(FetchError::Transient("reset".into())), Ok(4.16)],
        );
        let tiers: Vec<Arc<dyn Provider>> = vec![flaky.clone()];

        let reading = resolver.resolve(&spec("DGS10"), &tiers).await;

        assert_eq!(reading.value, 4.16);
        assert_eq!(flaky.calls(), 3);
        let health = resolver.context().health.query(Duration::from_secs(60));
        assert_eq!(health[&FetchMethod::FredCsv].total, 3);
        assert_eq!(health[&FetchMethod::FredCsv].successes, 1);
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let resolver = SourceResolver::new(test_context());
        let broken_auth = ScriptedProvider::new(
            FetchMethod::FredApi,
            vec![Err(FetchError::Permanent("no key".into()))],
        );
        let backup = ScriptedProvider::always(FetchMethod::FredCsv, 4.16);
        let tiers: Vec<Arc<dyn Provider>> = vec![broken_auth.clone(), backup];

        let reading = resolver.resolve(&spec("DGS10"), &tiers).await;

        assert_eq!(reading.provenance.method, FetchMethod::FredCsv);
        assert_eq!(broken_auth.calls(), 1);
    }

    #[tokio::test]
    async fn zero_value_is_never_cached_or_returned() {
        let resolver = SourceResolver::new(test_context());
        let zero = ScriptedProvider::always(FetchMethod::Yahoo, 0.0);
        let csv = ScriptedProvider::always(FetchMethod::FredCsv, 17.0);
        let tiers: Vec<Arc<dyn Provider>> = vec![zero.clone(), csv];

        let reading = resolver.resolve(&spec("VIX"), &tiers).await;

        assert_eq!(reading.value, 17.0);
        assert_eq!(zero.calls(), 3);
        let cached: Option<Reading> = resolver
            .context()
            .cache
            .get(&key_patterns::reading("VIX", FetchMethod::Yahoo))
            .await
            .unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn out_of_bounds_value_falls_through() {
        let resolver = SourceResolver::new(test_context());
        let absurd = ScriptedProvider::always(FetchMethod::Yahoo, 250.0);
        let tiers: Vec<Arc<dyn Provider>> = vec![absurd];

        let reading = resolver.resolve(&spec("DXY"), &tiers).await;

        assert!(!reading.is_live);
        assert_eq!(reading.value, 96.9);
        assert_eq!(reading.provenance.method, FetchMethod::Fallback);
    }

    #[tokio::test]
    async fn all_tiers_failing_yields_fallback() {
        let resolver = SourceResolver::new(test_context());
        let down = ScriptedProvider::new(
            FetchMethod::FredApi,
            vec![Err(FetchError::Transient("down".into()))],
        );
        let tiers: Vec<Arc<dyn Provider>> = vec![down];

        let reading = resolver.resolve(&spec("HY_OAS"), &tiers).await;

        assert!(!reading.is_live);
        assert_eq!(reading.value, 2.86);
        assert_eq!(reading.signal, Signal::Bullish);
        let health = resolver.context().health.query(Duration::from_secs(60));
        assert_eq!(health[&FetchMethod::Fallback].total, 1);
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let resolver = SourceResolver::new(test_context());
        let slow = ScriptedProvider::slow(FetchMethod::Scrape, 20.0, Duration::from_secs(5));
        let tiers: Vec<Arc<dyn Provider>> = vec![slow.clone()];

        let reading = resolver.resolve(&spec("SP500_PE"), &tiers).await;

        assert!(!reading.is_live);
        assert_eq!(slow.calls(), 3);
    }

    #[tokio::test]
    async fn cached_tier_skips_the_provider() {
        let resolver = SourceResolver::new(test_context());
        let provider = ScriptedProvider::always(FetchMethod::FredCsv, 17.0);
        let tiers: Vec<Arc<dyn Provider>> = vec![provider.clone()];

        let first = resolver.resolve(&spec("VIX"), &tiers).await;
        let second = resolver.resolve(&spec("VIX"), &tiers).await;

        assert_eq!(provider.calls(), 1);
        assert_eq!(first, second);
        assert!(second.is_live);
    }

    #[tokio::test]
    async fn cached_reading_survives_restart_without_provider_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resolver.db");
        let path = path.to_str().unwrap();

        let first = {
            let mut ctx = test_context();
            ctx.cache = Arc::new(CacheLayer::new(Arc::new(SqliteStore::open(path).unwrap()), 100));
            let resolver = SourceResolver::new(ctx);
            let provider = ScriptedProvider::always(FetchMethod::FredCsv, 17.79);
            let tiers: Vec<Arc<dyn Provider>> = vec![provider.clone()];
            let reading = resolver.resolve(&spec("VIX"), &tiers).await;
            assert_eq!(provider.calls(), 1);
            reading
        };

        let store = Arc::new(SqliteStore::open(path).unwrap());
        let mut ctx = test_context();
        ctx.cache = Arc::new(CacheLayer::open(store, 100).await.unwrap());
        let resolver = SourceResolver::new(ctx);
        let provider = ScriptedProvider::always(FetchMethod::FredCsv, 30.0);
        let tiers: Vec<Arc<dyn Provider>> = vec![provider.clone()];

        let second = resolver.resolve(&spec("VIX"), &tiers).await;

        assert_eq!(provider.calls(), 0);
        assert_eq!(second.value, first.value);
        assert!(second.is_live);
        assert_eq!(second.provenance.method, FetchMethod::FredCsv);
    }
}
