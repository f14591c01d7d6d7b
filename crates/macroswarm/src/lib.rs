//! MacroSwarm - US equity macro regime signal
//!
//! Resolves a fixed set of macro indicators through ordered fallback tiers,
//! classifies them with rule-based agents, and combines the agent votes into
//! one weighted composite signal.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use macroswarm::models::MacroConfig;
//! use macroswarm::agents::RunOutcome;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let swarm = macroswarm::build_swarm(MacroConfig::default()).await?;
//! if let RunOutcome::Completed(report) = swarm.orchestrator.run().await {
//!     println!("{} ({:+.3})", report.overall_signal, report.weighted_score);
//! }
//! swarm.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub use macroswarm_agents as agents;
pub use macroswarm_cache as cache;
pub use macroswarm_fetcher as fetcher;
pub use macroswarm_models as models;

pub mod daemon;
pub mod output;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use macroswarm_agents::{ClassifierAgent, RuleAgent, SwarmOrchestrator};
use macroswarm_cache::{
    window_start, CacheError, CacheLayer, DurableStore, HealthTracker, SqliteStore,
};
use macroswarm_fetcher::providers::fallback::StaticFallback;
use macroswarm_fetcher::{
    FactorFetcher, ProviderFactory, ProviderRegistry, ResolverContext, SourceResolver,
};
use macroswarm_models::{FetchMethod, MacroConfig, MethodHealth};

/// Every long-lived service of one process, wired together.
pub struct Swarm {
    pub config: MacroConfig,
    pub store: Arc<SqliteStore>,
    pub cache: Arc<CacheLayer>,
    pub health: Arc<HealthTracker>,
    pub orchestrator: Arc<SwarmOrchestrator>,
}

impl Swarm {
    /// Wire the services around an open store and a tier registry.
    /// Rehydrates the hot cache from the store.
    pub async fn assemble(
        config: MacroConfig,
        store: Arc<SqliteStore>,
        registry: Arc<dyn ProviderRegistry>,
    ) -> Result<Self, CacheError> {
        let durable: Arc<dyn DurableStore> = store.clone();
        let cache =
            Arc::new(CacheLayer::open(durable.clone(), config.cache.memory_max_capacity).await?);
        let health = Arc::new(HealthTracker::with_store(durable.clone()));

        let resolver = Arc::new(SourceResolver::new(ResolverContext {
            cache: cache.clone(),
            health: health.clone(),
            retry: config.retry.clone(),
            cache_ttls: config.cache.clone(),
            call_timeout: Duration::from_secs(config.fetch.call_timeout_seconds),
            fallback: StaticFallback::new(config.fetch.fallback_max_age_days),
        }));
        let fetcher = Arc::new(FactorFetcher::new(
            config.indicators.clone(),
            config.derived.clone(),
            config.fetch.workers,
            resolver,
            registry,
        ));

        let agents: Vec<Arc<dyn ClassifierAgent>> = RuleAgent::from_config_all(&config)
            .into_iter()
            .map(|agent| Arc::new(agent) as Arc<dyn ClassifierAgent>)
            .collect();
        let orchestrator = Arc::new(
            SwarmOrchestrator::new(fetcher, agents, config.swarm.bands).with_store(durable),
        );

        Ok(Self {
            config,
            store,
            cache,
            health,
            orchestrator,
        })
    }

    /// Durable per-method aggregate over the trailing `window`.
    pub fn health_summary(
        &self,
        window: Duration,
    ) -> Result<BTreeMap<FetchMethod, MethodHealth>, CacheError> {
        self.store.health_summary(window_start(Utc::now(), window))
    }

    /// Flush queued health records to the store.
    pub async fn shutdown(&self) {
        self.health.close().await;
    }
}

/// Build a Swarm from configuration, using HTTP providers.
pub async fn build_swarm(config: MacroConfig) -> anyhow::Result<Swarm> {
    config.validate().context("Invalid configuration")?;

    let path = &config.cache.sqlite_path;
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let store = Arc::new(
        SqliteStore::open(path).with_context(|| format!("Failed to open store: {path}"))?,
    );
    let factory = ProviderFactory::new(&config.providers, config.fetch.csv_lookback_days)
        .map_err(|e| anyhow::anyhow!("Failed to build providers: {e}"))?;

    Swarm::assemble(config, store, Arc::new(factory))
        .await
        .context("Failed to rehydrate cache")
}

/// Read and validate a TOML configuration file.
pub fn load_config(path: &str) -> anyhow::Result<MacroConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {path}"))?;
    let config: MacroConfig = toml::from_str(&config_str).context("Failed to parse config")?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
