//! Redis cache backend.
//!
//! Uses a multiplexed `ConnectionManager` that reconnects on its own.
//! Multi-key calls go out as a single `MGET`/`DEL` or one pipeline, and
//! pattern scans use cursor-based `SCAN MATCH` so the server is never
//! blocked by `KEYS`.

use super::traits::{CacheBackend, MemoryStats};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use vista_core::config::env_or;
use vista_core::{VistaError, VistaResult};

const SCAN_BATCH: u64 = 100;

/// Connection settings for [`RedisBackend`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL (default: redis://127.0.0.1:6379)
    pub url: String,
    /// Prefix applied to every key (default: empty)
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
        }
    }
}

impl RedisConfig {
    /// Create RedisConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VISTA_REDIS_URL`: connection URL
    /// - `VISTA_REDIS_KEY_PREFIX`: prefix for every key
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_or("VISTA_REDIS_URL", defaults.url),
            key_prefix: env_or("VISTA_REDIS_KEY_PREFIX", defaults.key_prefix),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Redis-backed [`CacheBackend`].
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    config: RedisConfig,
}

fn redis_error(e: redis::RedisError) -> VistaError {
    VistaError::backend("redis", e)
}

impl RedisBackend {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(config: RedisConfig) -> VistaResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(redis_error)?;
        let mut conn = ConnectionManager::new(client).await.map_err(redis_error)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        tracing::info!(url = %config.url, "Redis cache backend connected");
        Ok(Self { conn, config })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn strip_prefix(&self, key: String) -> Option<String> {
        key.strip_prefix(self.config.key_prefix.as_str())
            .map(str::to_string)
    }

    fn set_cmd(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> redis::Cmd {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.full_key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        cmd
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> VistaResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> VistaResult<()> {
        let mut conn = self.conn.clone();
        let _: () = self
            .set_cmd(key, value, ttl)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> VistaResult<bool> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> VistaResult<bool> {
        let mut conn = self.conn.clone();
        let count: u64 = redis::cmd("EXISTS")
            .arg(self.full_key(key))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(count > 0)
    }

    async fn get_many(&self, keys: &[String]) -> VistaResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(full)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(values)
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> VistaResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for (key, value) in entries {
            pipe.add_command(self.set_cmd(&key, value, ttl)).ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.map_err(redis_error)?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> VistaResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let full: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let removed: u64 = redis::cmd("DEL")
            .arg(full)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(removed)
    }

    fn supports_pattern_scan(&self) -> bool {
        true
    }

    async fn scan(&self, glob: &str) -> VistaResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = self.full_key(glob);
        let mut cursor: u64 = 0;
        let mut found = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(redis_error)?;
            found.extend(keys.into_iter().filter_map(|k| self.strip_prefix(k)));
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(found)
    }

    async fn memory_stats(&self) -> VistaResult<Option<MemoryStats>> {
        let mut conn = self.conn.clone();
        let info: String = redis::cmd("INFO")
            .arg("memory")
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(Some(parse_memory_info(&info)))
    }
}

fn parse_memory_info(info: &str) -> MemoryStats {
    let mut stats = MemoryStats::default();
    for line in info.lines() {
        let Some((field, value)) = line.trim().split_once(':') else {
            continue;
        };
        match field {
            "used_memory" => stats.used_bytes = value.parse().unwrap_or(0),
            "used_memory_peak" => stats.peak_bytes = value.parse().unwrap_or(0),
            "mem_fragmentation_ratio" => stats.fragmentation_ratio = value.parse().unwrap_or(0.0),
            _ => {}
        }
    }
    stats
}
