use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use macroswarm_models::store_schema::CacheRow;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::memory::{CacheEntry, MemoryCache};
use crate::sqlite::{timestamp, DurableStore};

/// Hit/miss counters plus the current hot-cache size.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hot_entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Read-through, write-through cache: moka (hot) → durable store → miss.
///
/// `put` writes the durable store before the hot cache, so a value that is
/// visible in memory is always recoverable after a restart. Store hits are
/// promoted to moka with their original expiry.
pub struct CacheLayer {
    memory: MemoryCache,
    store: Arc<dyn DurableStore>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn DurableStore>, max_capacity: u64) -> Self {
        Self {
            memory: MemoryCache::new(max_capacity),
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build the layer and load every unexpired durable entry into memory.
    pub async fn open(store: Arc<dyn DurableStore>, max_capacity: u64) -> Result<Self, CacheError> {
        let layer = Self::new(store, max_capacity);
        let loaded = layer.rehydrate().await?;
        debug!(entries = loaded, "Rehydrated hot cache from durable store");
        Ok(layer)
    }

    /// Copy unexpired durable rows into the hot cache. Returns how many were loaded.
    pub async fn rehydrate(&self) -> Result<usize, CacheError> {
        let rows = self.store.load_unexpired()?;
        let mut loaded = 0;
        for row in rows {
            match entry_from_row(&row) {
                Some(entry) => {
                    self.memory.insert(row.key, entry).await;
                    loaded += 1;
                }
                None => warn!(key = %row.key, "Skipping cache row with unparseable expiry"),
            }
        }
        Ok(loaded)
    }

    /// Typed lookup. Checks moka first, then the durable store.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_json(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Raw JSON lookup.
    pub async fn get_json(&self, key: &str) -> Result<Option<String>, CacheError> {
        if let Some(entry) = self.memory.get(key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry.value_json));
        }

        if let Some(row) = self.store.get(key)? {
            if let Some(entry) = entry_from_row(&row) {
                self.memory.insert(key.to_string(), entry).await;
            }
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(row.value_json));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let value_json = serde_json::to_string(value)?;
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let expires_at = now + ttl;

        self.store.put(&CacheRow {
            key: key.to_string(),
            value_json: value_json.clone(),
            created_at: timestamp(now),
            expires_at: timestamp(expires_at),
        })?;
        self.memory
            .insert(
                key.to_string(),
                CacheEntry {
                    value_json,
                    expires_at,
                },
            )
            .await;
        Ok(())
    }

    /// Force a miss for `key` in both tiers.
    pub async fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        self.memory.invalidate(key).await;
        self.store.delete(key)
    }

    /// Drop expired rows from the durable store.
    pub fn expire_stale(&self) -> Result<usize, CacheError> {
        self.store.expire_stale()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hot_entries: self.memory.entry_count().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }
}

fn entry_from_row(row: &CacheRow) -> Option<CacheEntry> {
    let expires_at = DateTime::parse_from_rfc3339(&row.expires_at)
        .ok()?
        .with_timezone(&Utc);
    Some(CacheEntry {
        value_json: row.value_json.clone(),
        expires_at,
    })
}
