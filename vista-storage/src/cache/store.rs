//! Cache Store Adapter.
//!
//! Wraps a raw [`CacheBackend`] with per-call timeouts, metrics, typed entry
//! envelopes and pattern operations. Backends without a native scan get
//! pattern support from the [`KeyRegistry`] of keys written through here.
//!
//! The registry lives in this process only. It sees the writes made through
//! this store and nothing else, so a backend shared by several instances
//! must support a native scan; set `shared_backend` to have the service
//! refuse to start otherwise.

use super::entry::CacheEntry;
use super::registry::KeyRegistry;
use super::traits::{CacheBackend, MemoryStats};
use crate::metrics::MetricsCollector;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vista_core::config::{env_flag, env_millis, env_secs};
use vista_core::{CacheTier, ConfigError, KeyPattern, VistaError, VistaResult};

const PRUNE_BATCH: usize = 500;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the store adapter.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Deadline for every backend call (default: 500ms)
    pub operation_timeout: Duration,
    /// Other processes write to the same backend (default: false)
    pub shared_backend: bool,
    /// How often expired keys are dropped from the key registry (default: 5min)
    pub registry_prune_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(500),
            shared_backend: false,
            registry_prune_interval: Duration::from_secs(300),
        }
    }
}

impl StoreConfig {
    /// Create StoreConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VISTA_CACHE_TIMEOUT_MS`: per-call backend deadline (default: 500)
    /// - `VISTA_CACHE_SHARED_BACKEND`: backend is shared across instances (default: false)
    /// - `VISTA_REGISTRY_PRUNE_SECS`: key registry prune interval (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            operation_timeout: env_millis("VISTA_CACHE_TIMEOUT_MS", defaults.operation_timeout),
            shared_backend: env_flag("VISTA_CACHE_SHARED_BACKEND", defaults.shared_backend),
            registry_prune_interval: env_secs(
                "VISTA_REGISTRY_PRUNE_SECS",
                defaults.registry_prune_interval,
            ),
        }
    }

    pub fn with_shared_backend(mut self, shared: bool) -> Self {
        self.shared_backend = shared;
        self
    }

    pub fn with_registry_prune_interval(mut self, every: Duration) -> Self {
        self.registry_prune_interval = every;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Statistics about cache usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub deletes: u64,
    pub errors: u64,
    pub total_operations: u64,
    /// Percent, two decimals
    pub hit_rate: f64,
    /// Keys tracked for pattern operations (0 with a native scan)
    pub tracked_keys: u64,
    pub memory: Option<MemoryStats>,
    pub last_reset: Option<DateTime<Utc>>,
}

// ============================================================================
// STORE
// ============================================================================

/// Shared handle to the cache backend. Cheap to clone.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    registry: Arc<KeyRegistry>,
    metrics: Arc<MetricsCollector>,
    config: StoreConfig,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        metrics: Arc<MetricsCollector>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backend,
            registry: Arc::new(KeyRegistry::new()),
            metrics,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// True when pattern operations go through the in-process key registry.
    pub fn uses_key_registry(&self) -> bool {
        !self.backend.supports_pattern_scan()
    }

    /// Fail when the key registry would stand in for a scan on a shared
    /// backend, where it cannot see other instances' writes.
    pub fn ensure_pattern_support(&self) -> VistaResult<()> {
        if self.config.shared_backend && self.uses_key_registry() {
            return Err(ConfigError::InvalidValue {
                field: "shared_backend".to_string(),
                value: self.backend.name().to_string(),
                reason: "a shared backend needs a native pattern scan".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Run a backend call under the configured deadline, counting failures.
    async fn call<T, F>(&self, operation: &'static str, key: &str, fut: F) -> VistaResult<T>
    where
        F: Future<Output = VistaResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                self.metrics.record_error(operation);
                tracing::warn!(error = %e, key = %key, operation, "Cache backend call failed");
                Err(e)
            }
            Err(_) => {
                self.metrics.record_error(operation);
                let err = VistaError::timeout(
                    self.backend.name(),
                    operation,
                    self.config.operation_timeout,
                );
                tracing::warn!(error = %err, key = %key, operation, "Cache backend call timed out");
                Err(err)
            }
        }
    }

    fn track(&self, key: &str) {
        if !self.backend.supports_pattern_scan() {
            self.registry.register(key);
        }
    }

    // ------------------------------------------------------------------------
    // Single-key operations
    // ------------------------------------------------------------------------

    /// Metered read: counts a hit or a miss.
    pub async fn get(&self, key: &str) -> VistaResult<Option<Vec<u8>>> {
        let started = Instant::now();
        let value = self.call("get", key, self.backend.get(key)).await?;
        match value {
            Some(_) => self.metrics.record_hit(key, started.elapsed()),
            None => self.metrics.record_miss(key, started.elapsed()),
        }
        Ok(value)
    }

    /// Unmetered read for internal read-modify-write and inspection.
    pub async fn peek(&self, key: &str) -> VistaResult<Option<Vec<u8>>> {
        self.call("get", key, self.backend.get(key)).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> VistaResult<()> {
        let started = Instant::now();
        self.call("set", key, self.backend.set(key, value, ttl)).await?;
        self.track(key);
        self.metrics.record_write(key, started.elapsed());
        Ok(())
    }

    /// Delete one key, reporting whether it existed.
    pub async fn delete(&self, key: &str) -> VistaResult<bool> {
        let started = Instant::now();
        let existed = self.call("delete", key, self.backend.delete(key)).await?;
        self.registry.unregister(key);
        self.metrics
            .record_deletes(key, u64::from(existed), started.elapsed());
        Ok(existed)
    }

    pub async fn exists(&self, key: &str) -> VistaResult<bool> {
        self.call("exists", key, self.backend.exists(key)).await
    }

    // ------------------------------------------------------------------------
    // Pipelined operations
    // ------------------------------------------------------------------------

    pub async fn get_many(&self, keys: &[String]) -> VistaResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();
        let label = keys[0].as_str();
        let values = self.call("get_many", label, self.backend.get_many(keys)).await?;
        let elapsed = started.elapsed();
        for (key, value) in keys.iter().zip(values.iter()) {
            match value {
                Some(_) => self.metrics.record_hit(key, elapsed),
                None => self.metrics.record_miss(key, elapsed),
            }
        }
        Ok(values)
    }

    pub async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> VistaResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
        let started = Instant::now();
        self.call("set_many", &keys[0], self.backend.set_many(entries, ttl))
            .await?;
        let elapsed = started.elapsed();
        for key in &keys {
            self.track(key);
            self.metrics.record_write(key, elapsed);
        }
        Ok(())
    }

    /// Delete several keys in one round trip, returning how many existed.
    pub async fn delete_many(&self, keys: &[String]) -> VistaResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let started = Instant::now();
        let removed = self
            .call("delete_many", &keys[0], self.backend.delete_many(keys))
            .await?;
        for key in keys {
            self.registry.unregister(key);
        }
        self.metrics
            .record_deletes(&keys[0], removed, started.elapsed());
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Pattern operations
    // ------------------------------------------------------------------------

    /// Live keys matching `pattern`, sorted.
    pub async fn keys_matching(&self, pattern: &KeyPattern) -> VistaResult<Vec<String>> {
        if pattern.is_concrete() {
            let exists = self.exists(pattern.as_str()).await?;
            return Ok(if exists {
                vec![pattern.as_str().to_string()]
            } else {
                Vec::new()
            });
        }

        if self.backend.supports_pattern_scan() {
            let glob = pattern.to_glob();
            let mut keys: Vec<String> = self
                .call("scan", pattern.as_str(), self.backend.scan(&glob))
                .await?
                .into_iter()
                .filter(|k| pattern.matches(k))
                .collect();
            keys.sort();
            keys.dedup();
            return Ok(keys);
        }

        let candidates = self.registry.matching(pattern);
        if candidates.is_empty() {
            return Ok(candidates);
        }
        let values = self
            .call("get_many", pattern.as_str(), self.backend.get_many(&candidates))
            .await?;
        let mut live = Vec::with_capacity(candidates.len());
        for (key, value) in candidates.into_iter().zip(values) {
            if value.is_some() {
                live.push(key);
            } else {
                self.registry.unregister(&key);
            }
        }
        Ok(live)
    }

    /// Drop registry entries whose keys no longer exist, typically after
    /// they expired in the backend. Returns how many were dropped.
    pub async fn prune_registry(&self) -> VistaResult<u64> {
        if !self.uses_key_registry() {
            return Ok(0);
        }
        let tracked = self.registry.keys();
        let mut pruned = 0u64;
        for batch in tracked.chunks(PRUNE_BATCH) {
            let values = self
                .call("get_many", &batch[0], self.backend.get_many(batch))
                .await?;
            for (key, value) in batch.iter().zip(values) {
                if value.is_none() {
                    self.registry.unregister(key);
                    pruned += 1;
                }
            }
        }
        self.registry.drop_empty_namespaces();
        tracing::debug!(pruned, remaining = self.registry.len(), "Key registry pruned");
        Ok(pruned)
    }

    /// Delete every key matching `pattern`, returning how many were removed.
    pub async fn delete_matching(&self, pattern: &KeyPattern) -> VistaResult<u64> {
        let keys = self.keys_matching(pattern).await?;
        let removed = self.delete_many(&keys).await?;
        tracing::debug!(pattern = %pattern, removed, "Deleted keys by pattern");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Typed entries
    // ------------------------------------------------------------------------

    /// Metered typed read. A corrupt entry is a `SerializationFailure`.
    pub async fn get_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> VistaResult<Option<CacheEntry<T>>> {
        match self.get(key).await? {
            Some(bytes) => self.decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Unmetered typed read.
    pub async fn peek_entry<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> VistaResult<Option<CacheEntry<T>>> {
        match self.peek(key).await? {
            Some(bytes) => self.decode(key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> VistaResult<CacheEntry<T>> {
        CacheEntry::decode(key, bytes).inspect_err(|e| {
            self.metrics.record_error("decode");
            tracing::error!(error = %e, key = %key, "Corrupt cache entry");
        })
    }

    /// Write an entry; the backend TTL follows the entry's expiry.
    pub async fn put_entry<T: Serialize>(&self, key: &str, entry: &CacheEntry<T>) -> VistaResult<()> {
        let bytes = entry.encode(key)?;
        let ttl = match entry.expires_at {
            Some(_) => Some(entry.ttl_remaining().unwrap_or(Duration::ZERO).max(Duration::from_millis(1))),
            None => None,
        };
        self.set(key, bytes, ttl).await
    }

    /// Wrap and write a value at a tier's TTL.
    pub async fn put_value<T: Serialize>(
        &self,
        key: &str,
        value: T,
        tier: CacheTier,
    ) -> VistaResult<CacheEntry<T>> {
        let entry = CacheEntry::new(value, tier);
        self.put_entry(key, &entry).await?;
        Ok(entry)
    }

    /// Stored size of a key in bytes, without touching hit metrics.
    pub async fn entry_size(&self, key: &str) -> VistaResult<Option<u64>> {
        Ok(self.peek(key).await?.map(|bytes| bytes.len() as u64))
    }

    // ------------------------------------------------------------------------
    // Stats
    // ------------------------------------------------------------------------

    pub async fn memory_stats(&self) -> VistaResult<Option<MemoryStats>> {
        self.call("memory_stats", "", self.backend.memory_stats()).await
    }

    pub async fn stats(&self) -> CacheStats {
        let memory = match self.memory_stats().await {
            Ok(memory) => memory,
            Err(e) => {
                tracing::warn!(error = %e, "Memory stats unavailable");
                None
            }
        };
        CacheStats {
            backend: self.backend.name().to_string(),
            hits: self.metrics.hits(),
            misses: self.metrics.misses(),
            writes: self.metrics.writes(),
            deletes: self.metrics.deletes(),
            errors: self.metrics.errors(),
            total_operations: self.metrics.total_operations(),
            hit_rate: self.metrics.hit_rate(),
            tracked_keys: self.registry.len() as u64,
            memory,
            last_reset: self.metrics.last_reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::metrics::MetricsConfig;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    fn store_over(backend: MemoryBackend) -> CacheStore {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        CacheStore::new(Arc::new(backend), metrics, StoreConfig::default())
    }

    async fn seed(store: &CacheStore) {
        for key in [
            "restaurant:7:dashboard",
            "restaurant:8:dashboard",
            "menu:12:full:restaurant=7",
            "menu:13:full:restaurant=8",
        ] {
            store.put_value(key, json!({"k": key}), CacheTier::Warm).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_counts_hits_and_misses() {
        let store = store_over(MemoryBackend::new());
        store.set("menu:1", b"x".to_vec(), None).await.unwrap();
        assert!(store.get("menu:1").await.unwrap().is_some());
        assert!(store.get("menu:2").await.unwrap().is_none());
        assert!(store.peek("menu:2").await.unwrap().is_none());
        assert_eq!(store.metrics().hits(), 1);
        assert_eq!(store.metrics().misses(), 1);
        assert_eq!(store.metrics().writes(), 1);
    }

    #[tokio::test]
    async fn test_delete_matching_with_native_scan() {
        let store = store_over(MemoryBackend::new());
        seed(&store).await;
        let pattern = KeyPattern::parse("menu:*:**:restaurant=7:**").unwrap();
        assert_eq!(store.delete_matching(&pattern).await.unwrap(), 1);
        assert!(!store.exists("menu:12:full:restaurant=7").await.unwrap());
        assert!(store.exists("menu:13:full:restaurant=8").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_matching_with_registry() {
        let store = store_over(MemoryBackend::new().with_pattern_scan(false));
        seed(&store).await;
        let pattern = KeyPattern::parse("restaurant:7:*").unwrap();
        assert_eq!(
            store.keys_matching(&pattern).await.unwrap(),
            vec!["restaurant:7:dashboard".to_string()]
        );
        assert_eq!(store.delete_matching(&pattern).await.unwrap(), 1);
        assert!(store.exists("restaurant:8:dashboard").await.unwrap());
        assert_eq!(store.stats().await.tracked_keys, 3);
    }

    #[tokio::test]
    async fn test_prune_registry_drops_expired_keys() {
        let store = store_over(MemoryBackend::new().with_pattern_scan(false));
        seed(&store).await;
        store
            .set("order:1:summary", b"x".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(store.stats().await.tracked_keys, 5);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.prune_registry().await.unwrap(), 1);
        assert_eq!(store.stats().await.tracked_keys, 4);
        assert_eq!(store.prune_registry().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prune_registry_is_a_no_op_with_native_scan() {
        let store = store_over(MemoryBackend::new());
        seed(&store).await;
        assert!(!store.uses_key_registry());
        assert_eq!(store.prune_registry().await.unwrap(), 0);
    }

    #[test]
    fn test_shared_backend_requires_native_scan() {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let shared = StoreConfig::default().with_shared_backend(true);

        let scanning = CacheStore::new(Arc::new(MemoryBackend::new()), metrics.clone(), shared.clone());
        assert!(scanning.ensure_pattern_support().is_ok());

        let local = CacheStore::new(
            Arc::new(MemoryBackend::new().with_pattern_scan(false)),
            metrics.clone(),
            StoreConfig::default(),
        );
        assert!(local.ensure_pattern_support().is_ok());

        let registry_only = CacheStore::new(
            Arc::new(MemoryBackend::new().with_pattern_scan(false)),
            metrics,
            shared,
        );
        let err = registry_only.ensure_pattern_support().unwrap_err();
        assert!(matches!(
            err,
            VistaError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "shared_backend"
        ));
    }

    #[tokio::test]
    async fn test_typed_entries_round_trip() {
        let store = store_over(MemoryBackend::new());
        store
            .put_value("restaurant:7:dashboard", json!({"name": "Old"}), CacheTier::Hot)
            .await
            .unwrap();
        let entry: CacheEntry<Value> = store
            .get_entry("restaurant:7:dashboard")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.value["name"], "Old");
        assert_eq!(entry.tier, CacheTier::Hot);

        store.set("restaurant:7:raw", b"{broken".to_vec(), None).await.unwrap();
        let err = store.get_entry::<Value>("restaurant:7:raw").await.unwrap_err();
        assert!(matches!(err, VistaError::SerializationFailure { .. }));
    }

    struct StalledBackend;

    #[async_trait]
    impl CacheBackend for StalledBackend {
        fn name(&self) -> &'static str {
            "stalled"
        }
        async fn get(&self, _key: &str) -> VistaResult<Option<Vec<u8>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn set(&self, _: &str, _: Vec<u8>, _: Option<Duration>) -> VistaResult<()> {
            Err(VistaError::backend("stalled", "connection refused"))
        }
        async fn delete(&self, _key: &str) -> VistaResult<bool> {
            Ok(false)
        }
        async fn exists(&self, _key: &str) -> VistaResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_timeouts_and_failures_are_counted() {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let store = CacheStore::new(
            Arc::new(StalledBackend),
            metrics.clone(),
            StoreConfig::default().with_operation_timeout(Duration::from_millis(20)),
        );

        let err = store.get("menu:1").await.unwrap_err();
        assert!(err.is_backend_unavailable());
        let err = store.set("menu:1", vec![], None).await.unwrap_err();
        assert!(err.is_backend_unavailable());
        assert_eq!(metrics.errors(), 2);
        assert_eq!(metrics.errors_for("get"), 1);
        assert_eq!(metrics.misses(), 0);
    }
}
