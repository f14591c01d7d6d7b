pub mod error;
pub mod health;
pub mod layer;
pub mod memory;
pub mod sqlite;

pub use error::CacheError;
pub use health::{window_start, HealthTracker};
pub use layer::{CacheLayer, CacheStats};
pub use memory::{CacheEntry, MemoryCache};
pub use sqlite::{DurableStore, SqliteStore};
