//! L2 Query Result Cache
//!
//! Caches raw query results keyed by the normalized query fingerprint. A miss
//! executes through the [`QueryRouter`] and stores the result with the TTL of
//! the query's cache type.

use crate::router::QueryRouter;
use crate::source::{Consistency, QueryResult, QueryType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vista_core::{fingerprint, CacheTier, KeyPattern, VistaError, VistaResult, L2_NAMESPACE};
use vista_storage::{CacheEntry, CacheStore};

// ============================================================================
// CACHE TYPES
// ============================================================================

/// Kind of query being cached, which fixes its TTL and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCacheType {
    ComplexJoin,
    Aggregate,
    Dashboard,
    Analytics,
    Report,
    Default,
}

impl QueryCacheType {
    pub fn ttl(self) -> Duration {
        match self {
            Self::ComplexJoin => Duration::from_secs(10 * 60),
            Self::Aggregate => Duration::from_secs(15 * 60),
            Self::Dashboard => Duration::from_secs(10 * 60),
            Self::Analytics => Duration::from_secs(20 * 60),
            Self::Report => Duration::from_secs(60 * 60),
            Self::Default => Duration::from_secs(5 * 60),
        }
    }

    /// How a miss is routed.
    pub fn routing(self) -> (QueryType, Consistency) {
        match self {
            Self::Analytics | Self::Report => (QueryType::Analytics, Consistency::Unspecified),
            _ => (QueryType::Read, Consistency::Eventual),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ComplexJoin => "complex_join",
            Self::Aggregate => "aggregate",
            Self::Dashboard => "dashboard",
            Self::Analytics => "analytics",
            Self::Report => "report",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for QueryCacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryCacheType {
    type Err = VistaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complex_join" => Ok(Self::ComplexJoin),
            "aggregate" => Ok(Self::Aggregate),
            "dashboard" => Ok(Self::Dashboard),
            "analytics" => Ok(Self::Analytics),
            "report" => Ok(Self::Report),
            "default" => Ok(Self::Default),
            other => Err(VistaError::Config(vista_core::ConfigError::InvalidValue {
                field: "cache_type".to_string(),
                value: other.to_string(),
                reason: "unknown query cache type".to_string(),
            })),
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Default)]
struct L2Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    cached_micros: AtomicU64,
    uncached_micros: AtomicU64,
}

/// Effectiveness of the L2 cache since startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2CacheStats {
    pub total_queries: u64,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// Percent, two decimals
    pub hit_rate: f64,
    pub average_cached_ms: f64,
    pub average_uncached_ms: f64,
    /// Percent saved by a hit over a miss, never negative
    pub performance_improvement: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn average_ms(total_micros: u64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        round2(total_micros as f64 / count as f64 / 1000.0)
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Query result cache in front of the router.
#[derive(Clone)]
pub struct L2QueryCache {
    store: CacheStore,
    router: QueryRouter,
    counters: Arc<L2Counters>,
}

impl fmt::Debug for L2QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L2QueryCache")
            .field("store", &self.store)
            .field("router", &self.router)
            .finish()
    }
}

impl L2QueryCache {
    pub fn new(store: CacheStore, router: QueryRouter) -> Self {
        Self {
            store,
            router,
            counters: Default::default(),
        }
    }

    pub fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Cached result for a query, executing it on a miss.
    ///
    /// Backend failures while reading the cache degrade to an uncached
    /// execution. A corrupt entry is surfaced. Execution failures are counted
    /// and returned.
    pub async fn fetch_query(
        &self,
        sql: &str,
        params: &[Value],
        cache_type: QueryCacheType,
        force_refresh: bool,
    ) -> VistaResult<QueryResult> {
        let key = fingerprint(sql, params);
        let started = Instant::now();

        if force_refresh {
            if let Err(e) = self.store.delete(key.as_str()).await {
                tracing::warn!(key = %key, error = %e, "Could not drop cached query before refresh");
            }
        } else {
            match self.store.get_entry::<QueryResult>(key.as_str()).await {
                Ok(Some(entry)) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .cached_micros
                        .fetch_add(started.elapsed().as_micros() as u64, Ordering::Relaxed);
                    tracing::trace!(key = %key, cache_type = %cache_type, "L2 hit");
                    return Ok(entry.into_value());
                }
                Ok(None) => {}
                Err(e @ VistaError::SerializationFailure { .. }) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(key = %key, error = %e, "L2 read failed, executing uncached");
                }
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let (query_type, consistency) = cache_type.routing();
        let result = match self.router.execute(sql, params, query_type, consistency).await {
            Ok(result) => result,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(key = %key, cache_type = %cache_type, error = %e, "L2 query execution failed");
                return Err(e);
            }
        };
        let elapsed = started.elapsed();
        self.counters
            .uncached_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.store.metrics().record_regeneration(key.as_str(), elapsed);

        let ttl = cache_type.ttl();
        let entry = CacheEntry::with_ttl(result, CacheTier::for_ttl(ttl), Some(ttl));
        if let Err(e) = self.store.put_entry(key.as_str(), &entry).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(key = %key, error = %e, "Could not store L2 result");
        }
        Ok(entry.into_value())
    }

    /// Drop the cached result of one query.
    pub async fn clear_query(&self, sql: &str, params: &[Value]) -> VistaResult<bool> {
        self.store.delete(fingerprint(sql, params).as_str()).await
    }

    /// Drop cached results matching a pattern inside the L2 namespace.
    pub async fn clear_pattern(&self, pattern: &str) -> VistaResult<u64> {
        let prefix = format!("{}:", L2_NAMESPACE);
        let scoped = if pattern.starts_with(&prefix) {
            pattern.to_string()
        } else {
            format!("{}{}", prefix, pattern)
        };
        let pattern = KeyPattern::parse(scoped)?;
        let removed = self.store.delete_matching(&pattern).await?;
        tracing::info!(pattern = %pattern, removed, "Cleared L2 query results");
        Ok(removed)
    }

    pub async fn clear_all(&self) -> VistaResult<u64> {
        self.clear_pattern("*").await
    }

    pub fn stats(&self) -> L2CacheStats {
        let c = &self.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let average_cached_ms = average_ms(c.cached_micros.load(Ordering::Relaxed), hits);
        let average_uncached_ms = average_ms(c.uncached_micros.load(Ordering::Relaxed), misses);
        let performance_improvement = if average_uncached_ms > 0.0 && hits > 0 {
            round2(((average_uncached_ms - average_cached_ms) / average_uncached_ms * 100.0).max(0.0))
        } else {
            0.0
        };

        L2CacheStats {
            total_queries: total,
            hits,
            misses,
            errors: c.errors.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                round2(hits as f64 / total as f64 * 100.0)
            },
            average_cached_ms,
            average_uncached_ms,
            performance_improvement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterConfig;
    use crate::source::DataSource;
    use async_trait::async_trait;
    use serde_json::json;
    use vista_storage::{MemoryBackend, MetricsCollector, MetricsConfig, StoreConfig};

    struct CountingSource {
        calls: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl DataSource for CountingSource {
        fn name(&self) -> &str {
            "primary"
        }
        async fn query(&self, _sql: &str, params: &[Value]) -> VistaResult<QueryResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VistaError::backend("primary", "relation does not exist"));
            }
            Ok(QueryResult::new(
                vec!["restaurant_id".into(), "total".into()],
                vec!["int8".into(), "numeric".into()],
                vec![vec![params.first().cloned().unwrap_or(Value::Null), json!(42.5)]],
            ))
        }
        async fn probe(&self) -> VistaResult<()> {
            Ok(())
        }
        async fn replication_lag_seconds(&self) -> VistaResult<f64> {
            Ok(0.0)
        }
    }

    fn cache(fail: bool) -> (L2QueryCache, Arc<CountingSource>) {
        let source = Arc::new(CountingSource {
            calls: AtomicU64::new(0),
            fail,
        });
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let store = CacheStore::new(Arc::new(MemoryBackend::new()), metrics, StoreConfig::default());
        let router = QueryRouter::new(source.clone(), RouterConfig::default());
        (L2QueryCache::new(store, router), source)
    }

    const SQL: &str = "SELECT restaurant_id, SUM(total) FROM orders WHERE restaurant_id = $1 GROUP BY 1";

    #[tokio::test]
    async fn test_second_fetch_is_a_hit() {
        let (l2, source) = cache(false);
        let first = l2.fetch_query(SQL, &[json!(7)], QueryCacheType::Aggregate, false).await.unwrap();
        let reformatted = "select restaurant_id,   SUM(total)\n FROM orders -- by restaurant\n WHERE restaurant_id = $1 GROUP BY 1";
        let second = l2
            .fetch_query(reformatted, &[json!(7)], QueryCacheType::Aggregate, false)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        let stats = l2.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 50.0);
        assert!(stats.performance_improvement >= 0.0);
    }

    #[tokio::test]
    async fn test_params_and_force_refresh() {
        let (l2, source) = cache(false);
        l2.fetch_query(SQL, &[json!(7)], QueryCacheType::Dashboard, false).await.unwrap();
        l2.fetch_query(SQL, &[json!(8)], QueryCacheType::Dashboard, false).await.unwrap();
        l2.fetch_query(SQL, &[json!(7)], QueryCacheType::Dashboard, true).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);

        assert!(l2.clear_query(SQL, &[json!(8)]).await.unwrap());
        assert_eq!(l2.clear_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_execution_errors_are_counted_and_returned() {
        let (l2, _) = cache(true);
        let err = l2
            .fetch_query(SQL, &[json!(7)], QueryCacheType::Default, false)
            .await
            .unwrap_err();
        assert!(err.is_backend_unavailable());
        assert_eq!(l2.stats().errors, 1);
    }

    #[test]
    fn test_cache_type_table() {
        assert_eq!(QueryCacheType::Report.ttl(), Duration::from_secs(3600));
        assert_eq!(QueryCacheType::Default.ttl(), Duration::from_secs(300));
        assert_eq!(QueryCacheType::Analytics.routing().0, QueryType::Analytics);
        assert_eq!(QueryCacheType::ComplexJoin.routing(), (QueryType::Read, Consistency::Eventual));
        assert_eq!("complex_join".parse::<QueryCacheType>().unwrap(), QueryCacheType::ComplexJoin);
        assert!("nightly".parse::<QueryCacheType>().is_err());
    }
}
