//! Metrics & Health Collector
//!
//! Monotonic operation counters live in a private Prometheus registry so they
//! can be exported in text format without touching the process-global one.
//! Rolling response-time samples are kept per cache type (the namespace of
//! the key involved) and summarized over the realtime, short, medium and long
//! windows. Regeneration times are kept per key for impact estimates.

mod report;
mod samples;

pub use report::{
    ExportFormat, MetricsSnapshot, Recommendation, RecommendationCategory,
    RecommendationPriority, WindowStats,
};
pub use samples::{ResponseTimeStats, TimeWindow};

use crate::cache::CacheBackend;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use prometheus::{Gauge, IntCounter, Registry};
use samples::{round2, SampleBuffer};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use vista_core::config::env_or;
use vista_core::{namespace_of, ConfigError, VistaError, VistaResult};

/// Reserved key prefix for persisted counters.
pub const METRICS_NAMESPACE: &str = "vista_metrics";

const PERSISTED_COUNTERS: [&str; 5] = ["hits", "misses", "writes", "deletes", "errors"];

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Thresholds and capacities for the collector.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Hit rate (percent) below which a performance recommendation fires
    pub hit_rate_floor: f64,
    /// Error rate (percent) above which a reliability recommendation fires
    pub error_rate_ceiling: f64,
    /// Fragmentation ratio above which a memory recommendation fires
    pub fragmentation_ceiling: f64,
    /// Response-time samples kept per cache type
    pub sample_capacity: usize,
    /// Regeneration samples kept per key
    pub regeneration_capacity: usize,
    /// Keys tracked for regeneration time before the stalest is evicted
    pub regeneration_key_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            hit_rate_floor: 90.0,
            error_rate_ceiling: 1.0,
            fragmentation_ceiling: 1.5,
            sample_capacity: 10_000,
            regeneration_capacity: 32,
            regeneration_key_capacity: 10_000,
        }
    }
}

impl MetricsConfig {
    /// Create MetricsConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VISTA_HIT_RATE_FLOOR`: hit rate percent floor (default: 90)
    /// - `VISTA_ERROR_RATE_CEILING`: error rate percent ceiling (default: 1.0)
    /// - `VISTA_FRAGMENTATION_CEILING`: memory fragmentation ceiling (default: 1.5)
    /// - `VISTA_METRICS_SAMPLE_CAPACITY`: samples kept per cache type (default: 10000)
    /// - `VISTA_REGENERATION_KEY_CAPACITY`: keys tracked for regeneration time (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            hit_rate_floor: env_or("VISTA_HIT_RATE_FLOOR", defaults.hit_rate_floor),
            error_rate_ceiling: env_or("VISTA_ERROR_RATE_CEILING", defaults.error_rate_ceiling),
            fragmentation_ceiling: env_or(
                "VISTA_FRAGMENTATION_CEILING",
                defaults.fragmentation_ceiling,
            ),
            sample_capacity: env_or("VISTA_METRICS_SAMPLE_CAPACITY", defaults.sample_capacity),
            regeneration_capacity: defaults.regeneration_capacity,
            regeneration_key_capacity: env_or(
                "VISTA_REGENERATION_KEY_CAPACITY",
                defaults.regeneration_key_capacity,
            ),
        }
    }

    pub fn with_hit_rate_floor(mut self, percent: f64) -> Self {
        self.hit_rate_floor = percent;
        self
    }

    pub fn with_error_rate_ceiling(mut self, percent: f64) -> Self {
        self.error_rate_ceiling = percent;
        self
    }

    pub fn with_sample_capacity(mut self, capacity: usize) -> Self {
        self.sample_capacity = capacity;
        self
    }

    pub fn with_regeneration_key_capacity(mut self, capacity: usize) -> Self {
        self.regeneration_key_capacity = capacity;
        self
    }
}

// ============================================================================
// COLLECTOR
// ============================================================================

struct Counters {
    hits: IntCounter,
    misses: IntCounter,
    writes: IntCounter,
    deletes: IntCounter,
    errors: IntCounter,
}

struct Gauges {
    hit_rate: Gauge,
    miss_rate: Gauge,
    error_rate: Gauge,
    throughput: Gauge,
    operations: Gauge,
}

/// Process-wide cache metrics.
pub struct MetricsCollector {
    config: MetricsConfig,
    registry: Registry,
    counters: Counters,
    gauges: Gauges,
    samples: DashMap<String, SampleBuffer>,
    regeneration: DashMap<String, SampleBuffer>,
    errors_by_operation: DashMap<&'static str, u64>,
    last_reset: RwLock<Option<DateTime<Utc>>>,
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("config", &self.config)
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}

fn registration_error(name: &str, e: prometheus::Error) -> VistaError {
    VistaError::Config(ConfigError::InvalidValue {
        field: "metrics".to_string(),
        value: name.to_string(),
        reason: e.to_string(),
    })
}

fn counter(registry: &Registry, name: &str, help: &str) -> VistaResult<IntCounter> {
    let counter = IntCounter::new(name, help).map_err(|e| registration_error(name, e))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| registration_error(name, e))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> VistaResult<Gauge> {
    let gauge = Gauge::new(name, help).map_err(|e| registration_error(name, e))?;
    registry
        .register(Box::new(gauge.clone()))
        .map_err(|e| registration_error(name, e))?;
    Ok(gauge)
}

impl MetricsCollector {
    /// Create a collector with its own Prometheus registry.
    pub fn new(config: MetricsConfig) -> VistaResult<Self> {
        let registry = Registry::new();
        let counters = Counters {
            hits: counter(&registry, "cache_hits_total", "Cache reads that found a value")?,
            misses: counter(&registry, "cache_misses_total", "Cache reads that found nothing")?,
            writes: counter(&registry, "cache_writes_total", "Cache writes")?,
            deletes: counter(&registry, "cache_deletes_total", "Cache keys deleted")?,
            errors: counter(&registry, "cache_errors_total", "Failed or timed out cache calls")?,
        };
        let gauges = Gauges {
            hit_rate: gauge(&registry, "cache_hit_rate", "Hit rate in percent")?,
            miss_rate: gauge(&registry, "cache_miss_rate", "Miss rate in percent")?,
            error_rate: gauge(&registry, "cache_error_rate", "Error rate in percent")?,
            throughput: gauge(
                &registry,
                "cache_throughput",
                "Operations per second over the realtime window",
            )?,
            operations: gauge(&registry, "cache_operations_total", "All cache operations")?,
        };

        Ok(Self {
            config,
            registry,
            counters,
            gauges,
            samples: DashMap::new(),
            regeneration: DashMap::new(),
            errors_by_operation: DashMap::new(),
            last_reset: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    // ------------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------------

    pub fn record_hit(&self, key: &str, elapsed: Duration) {
        self.counters.hits.inc();
        self.record_sample(key, elapsed);
    }

    pub fn record_miss(&self, key: &str, elapsed: Duration) {
        self.counters.misses.inc();
        self.record_sample(key, elapsed);
    }

    pub fn record_write(&self, key: &str, elapsed: Duration) {
        self.counters.writes.inc();
        self.record_sample(key, elapsed);
    }

    pub fn record_deletes(&self, key: &str, count: u64, elapsed: Duration) {
        self.counters.deletes.inc_by(count);
        self.record_sample(key, elapsed);
    }

    pub fn record_error(&self, operation: &'static str) {
        self.counters.errors.inc();
        *self.errors_by_operation.entry(operation).or_insert(0) += 1;
    }

    /// Record how long it took to recompute a cached view.
    ///
    /// At most `regeneration_key_capacity` keys are tracked; a new key past
    /// that evicts the one regenerated longest ago.
    pub fn record_regeneration(&self, key: &str, elapsed: Duration) {
        if !self.regeneration.contains_key(key)
            && self.regeneration.len() >= self.config.regeneration_key_capacity.max(1)
        {
            self.evict_stalest_regeneration();
        }
        let capacity = self.config.regeneration_capacity;
        self.regeneration
            .entry(key.to_string())
            .or_insert_with(|| SampleBuffer::new(capacity))
            .push(elapsed.as_secs_f64() * 1000.0);
    }

    fn evict_stalest_regeneration(&self) {
        let stalest = self
            .regeneration
            .iter()
            .min_by_key(|entry| entry.value().last_at())
            .map(|entry| entry.key().clone());
        if let Some(key) = stalest {
            self.regeneration.remove(&key);
            tracing::debug!(key = %key, "Evicted regeneration stats");
        }
    }

    fn record_sample(&self, key: &str, elapsed: Duration) {
        let cache_type = namespace_of(key).to_string();
        let capacity = self.config.sample_capacity;
        self.samples
            .entry(cache_type)
            .or_insert_with(|| SampleBuffer::new(capacity))
            .push(elapsed.as_secs_f64() * 1000.0);
    }

    // ------------------------------------------------------------------------
    // Reading
    // ------------------------------------------------------------------------

    pub fn hits(&self) -> u64 {
        self.counters.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses.get()
    }

    pub fn writes(&self) -> u64 {
        self.counters.writes.get()
    }

    pub fn deletes(&self) -> u64 {
        self.counters.deletes.get()
    }

    pub fn errors(&self) -> u64 {
        self.counters.errors.get()
    }

    pub fn errors_for(&self, operation: &str) -> u64 {
        self.errors_by_operation
            .get(operation)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Hits plus misses plus writes plus deletes.
    pub fn total_operations(&self) -> u64 {
        self.hits() + self.misses() + self.writes() + self.deletes()
    }

    /// Percent of reads that hit, rounded to two decimals. 0.0 with no reads.
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits() + self.misses();
        if reads == 0 {
            0.0
        } else {
            round2(self.hits() as f64 / reads as f64 * 100.0)
        }
    }

    pub fn miss_rate(&self) -> f64 {
        let reads = self.hits() + self.misses();
        if reads == 0 {
            0.0
        } else {
            round2(self.misses() as f64 / reads as f64 * 100.0)
        }
    }

    /// Errors as a percent of all operations.
    pub fn error_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            0.0
        } else {
            round2(self.errors() as f64 / total as f64 * 100.0)
        }
    }

    pub fn last_reset(&self) -> Option<DateTime<Utc>> {
        *self.last_reset.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Response-time summary for one cache type over a window.
    pub fn response_times(&self, cache_type: &str, window: TimeWindow) -> ResponseTimeStats {
        let values = self
            .samples
            .get(cache_type)
            .map(|buffer| buffer.within(window, Instant::now()))
            .unwrap_or_default();
        ResponseTimeStats::from_samples(values)
    }

    /// All-type statistics for one window.
    pub fn window_stats(&self, window: TimeWindow) -> WindowStats {
        let now = Instant::now();
        let values: Vec<f64> = self
            .samples
            .iter()
            .flat_map(|entry| entry.value().within(window, now))
            .collect();

        let operations = values.len() as u64;
        let stats = ResponseTimeStats::from_samples(values);
        WindowStats {
            window,
            operations,
            throughput_per_sec: round2(operations as f64 / window.duration().as_secs_f64()),
            average_response_ms: stats.average_ms,
            p95_response_ms: stats.p95_ms,
        }
    }

    /// Cache types with at least one sample.
    pub fn cache_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.samples.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    /// Mean regeneration time for a key, in milliseconds.
    pub fn average_regeneration_ms(&self, key: &str) -> Option<f64> {
        self.regeneration.get(key).and_then(|buffer| buffer.mean())
    }

    /// Number of keys with regeneration stats.
    pub fn regeneration_keys(&self) -> usize {
        self.regeneration.len()
    }

    /// Mean regeneration time across every key in a namespace.
    pub fn namespace_regeneration_ms(&self, namespace: &str) -> Option<f64> {
        let values: Vec<f64> = self
            .regeneration
            .iter()
            .filter(|entry| namespace_of(entry.key()) == namespace)
            .flat_map(|entry| entry.value().all())
            .collect();
        samples::mean(&values)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_types: BTreeMap<String, ResponseTimeStats> = self
            .cache_types()
            .into_iter()
            .map(|t| {
                let stats = self.response_times(&t, TimeWindow::Long);
                (t, stats)
            })
            .collect();

        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            deletes: self.deletes(),
            errors: self.errors(),
            total_operations: self.total_operations(),
            hit_rate: self.hit_rate(),
            miss_rate: self.miss_rate(),
            error_rate: self.error_rate(),
            windows: TimeWindow::ALL.iter().map(|w| self.window_stats(*w)).collect(),
            cache_types,
            last_reset: self.last_reset(),
            timestamp: Utc::now(),
        }
    }

    // ------------------------------------------------------------------------
    // Reset and persistence
    // ------------------------------------------------------------------------

    /// Zero every counter and sample, stamping the reset time.
    pub fn reset(&self) -> DateTime<Utc> {
        self.counters.hits.reset();
        self.counters.misses.reset();
        self.counters.writes.reset();
        self.counters.deletes.reset();
        self.counters.errors.reset();
        self.errors_by_operation.clear();
        self.samples.clear();
        self.regeneration.clear();

        let now = Utc::now();
        *self.last_reset.write().unwrap_or_else(|e| e.into_inner()) = Some(now);
        tracing::info!(reset_at = %now, "Cache metrics reset");
        now
    }

    fn counter_by_name(&self, name: &str) -> Option<&IntCounter> {
        match name {
            "hits" => Some(&self.counters.hits),
            "misses" => Some(&self.counters.misses),
            "writes" => Some(&self.counters.writes),
            "deletes" => Some(&self.counters.deletes),
            "errors" => Some(&self.counters.errors),
            _ => None,
        }
    }

    /// Write counters under the reserved prefix, without expiry.
    ///
    /// Goes straight to the backend so persisting does not count as a write.
    pub async fn persist(&self, backend: &dyn CacheBackend) -> VistaResult<()> {
        let mut entries: Vec<(String, Vec<u8>)> = PERSISTED_COUNTERS
            .iter()
            .filter_map(|name| {
                self.counter_by_name(name).map(|c| {
                    (
                        format!("{}:{}", METRICS_NAMESPACE, name),
                        c.get().to_string().into_bytes(),
                    )
                })
            })
            .collect();
        if let Some(reset) = self.last_reset() {
            entries.push((
                format!("{}:last_reset", METRICS_NAMESPACE),
                reset.to_rfc3339().into_bytes(),
            ));
        }
        backend.set_many(entries, None).await?;
        tracing::debug!("Cache metrics persisted");
        Ok(())
    }

    /// Add persisted counters onto this collector, typically at startup.
    pub async fn restore(&self, backend: &dyn CacheBackend) -> VistaResult<()> {
        let keys: Vec<String> = PERSISTED_COUNTERS
            .iter()
            .map(|name| format!("{}:{}", METRICS_NAMESPACE, name))
            .chain(std::iter::once(format!("{}:last_reset", METRICS_NAMESPACE)))
            .collect();
        let values = backend.get_many(&keys).await?;

        for (name, value) in PERSISTED_COUNTERS.iter().zip(values.iter()) {
            let Some(bytes) = value else { continue };
            let parsed = std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    VistaError::serialization(
                        format!("{}:{}", METRICS_NAMESPACE, name),
                        "counter is not an unsigned integer",
                    )
                })?;
            if let Some(counter) = self.counter_by_name(name) {
                counter.inc_by(parsed);
            }
        }

        if let Some(Some(bytes)) = values.last() {
            if let Some(reset) = std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            {
                *self.last_reset.write().unwrap_or_else(|e| e.into_inner()) =
                    Some(reset.with_timezone(&Utc));
            }
        }
        tracing::info!(hits = self.hits(), misses = self.misses(), "Cache metrics restored");
        Ok(())
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn refresh_gauges(&self) {
        self.gauges.hit_rate.set(self.hit_rate());
        self.gauges.miss_rate.set(self.miss_rate());
        self.gauges.error_rate.set(self.error_rate());
        self.gauges
            .throughput
            .set(self.window_stats(TimeWindow::Realtime).throughput_per_sec);
        self.gauges.operations.set(self.total_operations() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(MetricsConfig::default()).unwrap()
    }

    #[test]
    fn test_hit_rate_rounds_to_two_decimals() {
        let metrics = collector();
        assert_eq!(metrics.hit_rate(), 0.0);
        for _ in 0..100 {
            metrics.record_hit("menu:1", Duration::from_millis(1));
        }
        for _ in 0..20 {
            metrics.record_miss("menu:1", Duration::from_millis(3));
        }
        assert_eq!(metrics.hit_rate(), 83.33);
        assert_eq!(metrics.miss_rate(), 16.67);
    }

    #[test]
    fn test_error_rate_over_all_operations() {
        let metrics = collector();
        for _ in 0..99 {
            metrics.record_write("menu:1", Duration::from_millis(1));
        }
        metrics.record_deletes("menu:1", 1, Duration::from_millis(1));
        metrics.record_error("get");
        metrics.record_error("get");
        assert_eq!(metrics.error_rate(), 2.0);
        assert_eq!(metrics.errors_for("get"), 2);
    }

    #[test]
    fn test_response_times_by_cache_type() {
        let metrics = collector();
        metrics.record_hit("l2_query:a:b", Duration::from_millis(2));
        metrics.record_hit("l2_query:c:d", Duration::from_millis(4));
        metrics.record_hit("menu:1", Duration::from_millis(10));
        let stats = metrics.response_times("l2_query", TimeWindow::Realtime);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.average_ms, 3.0);
        assert_eq!(metrics.cache_types(), vec!["l2_query".to_string(), "menu".to_string()]);
        assert_eq!(metrics.window_stats(TimeWindow::Realtime).operations, 3);
    }

    #[test]
    fn test_regeneration_averages() {
        let metrics = collector();
        metrics.record_regeneration("restaurant:7:dashboard", Duration::from_millis(400));
        metrics.record_regeneration("restaurant:7:dashboard", Duration::from_millis(600));
        metrics.record_regeneration("restaurant:8:dashboard", Duration::from_millis(200));
        assert_eq!(metrics.average_regeneration_ms("restaurant:7:dashboard"), Some(500.0));
        assert_eq!(metrics.namespace_regeneration_ms("restaurant"), Some(400.0));
        assert_eq!(metrics.average_regeneration_ms("menu:1"), None);
    }

    #[test]
    fn test_reset_zeroes_and_stamps() {
        let metrics = collector();
        metrics.record_hit("menu:1", Duration::from_millis(1));
        metrics.record_error("set");
        let at = metrics.reset();
        assert_eq!(metrics.hits(), 0);
        assert_eq!(metrics.errors(), 0);
        assert_eq!(metrics.last_reset(), Some(at));
        assert!(metrics.cache_types().is_empty());
    }

    #[test]
    fn test_reset_clears_regeneration_stats() {
        let metrics = collector();
        metrics.record_regeneration("restaurant:7:dashboard", Duration::from_millis(400));
        metrics.record_regeneration("menu:12:full", Duration::from_millis(90));
        assert_eq!(metrics.regeneration_keys(), 2);

        metrics.reset();
        assert_eq!(metrics.regeneration_keys(), 0);
        assert_eq!(metrics.average_regeneration_ms("restaurant:7:dashboard"), None);
        assert_eq!(metrics.namespace_regeneration_ms("menu"), None);
    }

    #[test]
    fn test_regeneration_keys_are_bounded() {
        let metrics =
            MetricsCollector::new(MetricsConfig::default().with_regeneration_key_capacity(2))
                .unwrap();
        metrics.record_regeneration("restaurant:7:dashboard", Duration::from_millis(400));
        std::thread::sleep(Duration::from_millis(2));
        metrics.record_regeneration("restaurant:8:dashboard", Duration::from_millis(300));
        std::thread::sleep(Duration::from_millis(2));
        // already tracked, no eviction
        metrics.record_regeneration("restaurant:8:dashboard", Duration::from_millis(500));
        std::thread::sleep(Duration::from_millis(2));
        metrics.record_regeneration("menu:12:full", Duration::from_millis(90));

        assert_eq!(metrics.regeneration_keys(), 2);
        assert_eq!(metrics.average_regeneration_ms("restaurant:7:dashboard"), None);
        assert_eq!(metrics.average_regeneration_ms("restaurant:8:dashboard"), Some(400.0));
        assert_eq!(metrics.average_regeneration_ms("menu:12:full"), Some(90.0));
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let backend = MemoryBackend::new();
        let metrics = collector();
        metrics.reset();
        for _ in 0..3 {
            metrics.record_hit("menu:1", Duration::from_millis(1));
        }
        metrics.record_miss("menu:1", Duration::from_millis(1));
        metrics.persist(&backend).await.unwrap();

        let restored = collector();
        restored.restore(&backend).await.unwrap();
        assert_eq!(restored.hits(), 3);
        assert_eq!(restored.misses(), 1);
        assert_eq!(restored.last_reset(), metrics.last_reset());
        assert!(backend.keys().iter().all(|k| k.starts_with("vista_metrics:")));
    }
}
