//! Redis storage backend

use super::Storage;
use crate::error::{MemoryError, MemoryResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

/// Redis-backed key-value store
///
/// TTLs map onto `SET .. PX`, so expiry is enforced by Redis itself and a
/// session's working memory disappears without any sweeper on our side.
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
}

impl RedisStorage {
    /// Connect to `redis://host:port[/db]`
    pub async fn connect(url: &str) -> MemoryResult<Self> {
        let client = redis::Client::open(url).map_err(|e| MemoryError::storage("connect", e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| MemoryError::storage("connect", e))?;

        tracing::info!(url = %redact_url(url), "connected to redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> MemoryResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| MemoryError::storage("get", e))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> MemoryResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }

        cmd.query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| MemoryError::storage("set", e))
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .del(key)
            .await
            .map_err(|e| MemoryError::storage("delete", e))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> MemoryResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(key)
            .await
            .map_err(|e| MemoryError::storage("exists", e))
    }

    async fn keys(&self, prefix: &str) -> MemoryResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));

        let mut keys = Vec::new();
        let mut iter: redis::AsyncIter<'_, String> = conn
            .scan_match(pattern)
            .await
            .map_err(|e| MemoryError::storage("scan", e))?;
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }

        Ok(keys)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Escape Redis glob metacharacters so a prefix matches literally
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Drop credentials before logging a connection URL
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
