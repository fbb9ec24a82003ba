//! Best-effort key/value cache used by read paths.
//!
//! Nothing here is allowed to affect correctness: callers log cache errors
//! and carry on as if the entry was missing.

use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

mod moka_store;

pub use moka_store::MokaCache;

/// Prefix of the count entry stored alongside every cached list.
pub const COUNT_PREFIX: &str = "cnt-";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache payload could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("cached count is not a number: {0:?}")]
    InvalidCount(String),
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError>;
}

/// Used when caching is switched off: every lookup misses.
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
    async fn delete_prefix(&self, _prefix: &str) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Hex SHA-256 of the JSON form of `params`. Equal params give equal keys.
pub fn fingerprint<T: Serialize>(params: &T) -> Result<String, CacheError> {
    let bytes = serde_json::to_vec(params)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

pub fn count_key(key: &str) -> String {
    format!("{COUNT_PREFIX}{key}")
}

/// Reads a list and its count. Both halves must be present and non-empty;
/// anything less is a miss.
pub async fn get_list<T: DeserializeOwned>(
    cache: &dyn Cache,
    key: &str,
) -> Result<Option<(Vec<T>, usize)>, CacheError> {
    let value = cache.get(key).await?.filter(|v| !v.is_empty());
    let count = cache.get(&count_key(key)).await?.filter(|c| !c.is_empty());
    let (value, count) = match (value, count) {
        (Some(v), Some(c)) => (v, c),
        (None, None) => return Ok(None),
        _ => {
            // half an entry is as good as none; drop the leftover
            cache.delete(key).await?;
            cache.delete(&count_key(key)).await?;
            return Ok(None);
        }
    };
    let count = count
        .parse::<usize>()
        .map_err(|_| CacheError::InvalidCount(count.clone()))?;
    let items = serde_json::from_str(&value)?;
    Ok(Some((items, count)))
}

/// Writes a list and its count under one TTL.
pub async fn set_list<T: Serialize>(
    cache: &dyn Cache,
    key: &str,
    items: &[T],
    count: usize,
    ttl: Duration,
) -> Result<(), CacheError> {
    let value = serde_json::to_string(items)?;
    cache.set(key, value, ttl).await?;
    cache.set(&count_key(key), count.to_string(), ttl).await
}
