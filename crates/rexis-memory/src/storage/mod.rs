//! Key-value storage backends
//!
//! Working memory and the long-term record store both sit on a plain key-value
//! interface with optional per-key TTL. Keys are `::`-separated paths such as
//! `working_memory::acme::u1::session-42` or `memory::<id>`.
//!
//! ## Backends
//!
//! - [`InMemoryStorage`]: process-local map with lazy expiry (tests, single node)
//! - [`RedisStorage`]: Redis via a multiplexed connection manager (`redis` feature)

mod in_memory;
#[cfg(feature = "redis")]
mod redis;

pub use in_memory::InMemoryStorage;
#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;

use crate::error::MemoryResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Placeholder for an absent namespace or user in storage keys
pub(crate) const UNSCOPED: &str = "_";

/// Escape a caller-supplied key segment so it cannot contain the `::`
/// separator or equal the unscoped placeholder
pub(crate) fn escape_segment(segment: &str) -> String {
    let escaped = segment.replace('%', "%25").replace(':', "%3A");
    if escaped == UNSCOPED {
        "%5F".to_string()
    } else {
        escaped
    }
}

/// Inverse of [`escape_segment`]
pub(crate) fn unescape_segment(segment: &str) -> String {
    segment
        .replace("%5F", "_")
        .replace("%3A", ":")
        .replace("%25", "%")
}

/// Key segment for an optional scope value
pub(crate) fn scope_segment(value: Option<&str>) -> String {
    value.map_or_else(|| UNSCOPED.to_string(), escape_segment)
}

/// Key-value store with TTL support
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Read a value; `None` when missing or expired
    async fn get(&self, key: &str) -> MemoryResult<Option<String>>;

    /// Write a value, replacing any previous one; `ttl` of `None` never expires
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> MemoryResult<()>;

    /// Remove a key; returns whether it existed
    async fn delete(&self, key: &str) -> MemoryResult<bool>;

    /// Check whether a live key exists
    async fn exists(&self, key: &str) -> MemoryResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// List live keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> MemoryResult<Vec<String>>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Read and decode a JSON value
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> MemoryResult<Option<T>> {
    match storage.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value
pub async fn set_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> MemoryResult<()> {
    let raw = serde_json::to_string(value)?;
    storage.set(key, raw, ttl).await
}
