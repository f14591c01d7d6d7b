use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("missing reading: {0}")]
    MissingInput(String),

    #[error("non-finite reading for {key}: {value}")]
    NonFinite { key: String, value: f64 },

    #[error("Cache error: {0}")]
    Cache(#[from] macroswarm_cache::CacheError),
}
