pub mod error;
pub mod fetcher;
pub mod providers;
pub mod resolver;

pub use error::FetchError;
pub use fetcher::FactorFetcher;
pub use providers::{Observation, Provider, ProviderFactory, ProviderRegistry};
pub use resolver::{ResolverContext, SourceResolver};
