//! Read-path response cache adapter
//!
//! The ingestion pipeline never reads from this cache, it only drops entries
//! that its writes made stale.

use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;
use tracing::{debug, warn};

use crate::infrastructure::config::CacheConfig;

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn invalidate(&self, key: &str);

    /// Drop every key starting with `prefix`.
    async fn invalidate_pattern(&self, prefix: &str);
}

/// Key layout shared by the readers of the cache and the pipeline.
pub mod keys {
    pub const COMIC_LIST_PREFIX: &str = "comics:list";

    pub fn comic(comic_id: i64) -> String {
        format!("comics:{comic_id}")
    }

    pub fn comic_chapters_prefix(comic_id: i64) -> String {
        format!("comics:{comic_id}:chapters")
    }

    pub fn chapter(chapter_id: i64) -> String {
        format!("chapters:{chapter_id}")
    }
}

#[derive(Clone)]
pub struct MokaResponseCache {
    entries: Cache<String, String>,
}

impl MokaResponseCache {
    pub fn new(max_capacity: u64, ttl_seconds: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(Duration::from_secs(ttl_seconds))
                .support_invalidation_closures()
                .build(),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_capacity, config.ttl_seconds)
    }

    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into()).await;
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).await
    }
}

#[async_trait]
impl ResponseCache for MokaResponseCache {
    async fn invalidate(&self, key: &str) {
        debug!("🧹 Cache invalidate: {}", key);
        self.entries.invalidate(key).await;
    }

    async fn invalidate_pattern(&self, prefix: &str) {
        debug!("🧹 Cache invalidate prefix: {}*", prefix);
        let prefix = prefix.to_string();
        if let Err(e) = self
            .entries
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
        {
            warn!("Cache prefix invalidation unavailable: {}", e);
        }
    }
}

/// Used when no cache sits in front of the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResponseCache;

#[async_trait]
impl ResponseCache for NoopResponseCache {
    async fn invalidate(&self, _key: &str) {}

    async fn invalidate_pattern(&self, _prefix: &str) {}
}
