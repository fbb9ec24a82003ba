use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::{future::Cache as MokaInner, Expiry};

use super::{Cache, CacheError};

#[derive(Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Each entry lives for the TTL it was written with; an overwrite restarts it.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache on top of `moka`, with a TTL per entry.
#[derive(Clone)]
pub struct MokaCache {
    inner: MokaInner<String, Entry>,
}

impl MokaCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: MokaInner::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

#[async_trait]
impl Cache for MokaCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.inner.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.inner.insert(key.to_string(), Entry { value, ttl }).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        let keys: Vec<String> = self
            .inner
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.as_ref().clone())
            .collect();
        for key in keys {
            self.inner.invalidate(&key).await;
        }
        Ok(())
    }
}
