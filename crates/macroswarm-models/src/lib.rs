pub mod catalog;
pub mod config;
pub mod derived;
pub mod health;
pub mod reading;
pub mod report;
pub mod signal;
pub mod store_schema;
pub mod vote;

pub use config::{
    AgentSpec, CacheConfig, ConfigError, DerivedSpec, FallbackConfig, FetchConfig, IndicatorSpec,
    MacroConfig, ProvidersConfig, RetryConfig, ScheduleConfig, SwarmConfig, TierConfig,
    ValueBounds,
};
pub use derived::DerivedKind;
pub use health::{HealthRecord, MethodHealth};
pub use reading::{FetchMethod, Provenance, Reading, ReadingSet};
pub use report::{CompositeReport, VoteCounts};
pub use signal::{Signal, SignalBands, Threshold, ThresholdDirection};
pub use store_schema::CacheRow;
pub use vote::{AgentVote, Dimension};
