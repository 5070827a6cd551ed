//! Vista Test Utilities
//!
//! Centralized test infrastructure for the Vista workspace:
//! - Mock data sources and an operation-recording cache backend
//! - Proptest generators for keys, SQL and query results
//! - Fixture graphs, catalogs and seeded stores
//! - Custom assertions for Vista-specific validation

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub use vista_core::{
    CacheKey, CacheTier, EntityChange, EntityKind, EntityRef, KeyPattern, VistaError, VistaResult,
};
pub use vista_engine::{
    DependencyGraph, InvalidationReport, PopulationSource, RecomputeRegistry, TimeBucket,
    ViewCatalog,
};
pub use vista_query::{DataSource, PoolStats, QueryResult};
pub use vista_storage::{
    CacheBackend, CacheStore, MemoryBackend, MemoryStats, MetricsCollector, MetricsConfig,
    StoreConfig,
};

// ============================================================================
// MOCK DATA SOURCE
// ============================================================================

/// Scriptable [`DataSource`] with call counters.
#[derive(Debug)]
pub struct MockDataSource {
    name: String,
    lag_millis: AtomicU64,
    fail_queries: AtomicBool,
    fail_probe: AtomicBool,
    fail_lag: AtomicBool,
    queries: AtomicU64,
    probes: AtomicU64,
    last_sql: Mutex<Option<String>>,
    result: Mutex<QueryResult>,
    pool: Option<PoolStats>,
}

impl MockDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lag_millis: AtomicU64::new(0),
            fail_queries: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            fail_lag: AtomicBool::new(false),
            queries: AtomicU64::new(0),
            probes: AtomicU64::new(0),
            last_sql: Mutex::new(None),
            result: Mutex::new(fixtures::single_row_result()),
            pool: None,
        }
    }

    pub fn with_lag(self, seconds: f64) -> Self {
        self.set_lag(seconds);
        self
    }

    pub fn with_result(self, result: QueryResult) -> Self {
        if let Ok(mut slot) = self.result.lock() {
            *slot = result;
        }
        self
    }

    pub fn with_pool(mut self, pool: PoolStats) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Every query fails with `BackendUnavailable`.
    pub fn failing(self) -> Self {
        self.set_failing(true);
        self
    }

    pub fn set_lag(&self, seconds: f64) {
        self.lag_millis
            .store((seconds * 1000.0) as u64, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }

    pub fn set_probe_failing(&self, failing: bool) {
        self.fail_probe.store(failing, Ordering::SeqCst);
    }

    /// Lag lookups fail, as when the primary cannot be asked.
    pub fn set_lag_failing(&self, failing: bool) {
        self.fail_lag.store(failing, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn last_sql(&self) -> Option<String> {
        self.last_sql.lock().ok().and_then(|sql| sql.clone())
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> VistaResult<QueryResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_sql.lock() {
            *last = Some(sql.to_string());
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(VistaError::backend(&self.name, "connection refused"));
        }
        self.result
            .lock()
            .map(|r| r.clone())
            .map_err(|_| VistaError::backend(&self.name, "result lock poisoned"))
    }

    async fn probe(&self) -> VistaResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(VistaError::backend(&self.name, "probe failed"));
        }
        Ok(())
    }

    async fn replication_lag_seconds(&self) -> VistaResult<f64> {
        if self.fail_lag.load(Ordering::SeqCst) {
            return Err(VistaError::backend(&self.name, "lag unavailable"));
        }
        Ok(self.lag_millis.load(Ordering::SeqCst) as f64 / 1000.0)
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        self.pool
    }
}

// ============================================================================
// RECORDING BACKEND
// ============================================================================

/// [`MemoryBackend`] wrapper that logs every call and can be switched off.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    calls: Mutex<Vec<String>>,
    unavailable: AtomicBool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the wrapped backend from answering pattern scans.
    pub fn without_pattern_scan() -> Self {
        Self {
            inner: MemoryBackend::new().with_pattern_scan(false),
            ..Self::default()
        }
    }

    /// Make every call fail with `BackendUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Calls seen so far, formatted `"{op} {key}"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Keys deleted so far, in order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("delete ").map(str::to_string))
            .collect()
    }

    pub fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    fn record(&self, op: &str, key: &str) -> VistaResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{} {}", op, key));
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VistaError::backend("recording", "backend switched off"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn get(&self, key: &str) -> VistaResult<Option<Vec<u8>>> {
        self.record("get", key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> VistaResult<()> {
        self.record("set", key)?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> VistaResult<bool> {
        self.record("delete", key)?;
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> VistaResult<bool> {
        self.record("exists", key)?;
        self.inner.exists(key).await
    }

    fn supports_pattern_scan(&self) -> bool {
        self.inner.supports_pattern_scan()
    }

    async fn scan(&self, glob: &str) -> VistaResult<Vec<String>> {
        self.record("scan", glob)?;
        self.inner.scan(glob).await
    }

    async fn memory_stats(&self) -> VistaResult<Option<MemoryStats>> {
        self.inner.memory_stats().await
    }
}

// ============================================================================
// STORES AND DOMAIN SEAMS
// ============================================================================

/// Store over a fresh in-memory backend with default metrics.
pub fn memory_store() -> CacheStore {
    store_with(Arc::new(MemoryBackend::new()))
}

pub fn store_with(backend: Arc<dyn CacheBackend>) -> CacheStore {
    let metrics = match MetricsCollector::new(MetricsConfig::default()) {
        Ok(metrics) => Arc::new(metrics),
        Err(e) => panic!("default metrics config rejected: {}", e),
    };
    CacheStore::new(backend, metrics, StoreConfig::default())
}

/// [`ViewCatalog`] backed by a fixed table.
#[derive(Debug, Clone, Default)]
pub struct FixtureCatalog {
    views: HashMap<EntityRef, Vec<String>>,
    related: HashMap<EntityRef, Vec<EntityRef>>,
}

impl FixtureCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity: EntityRef, views: &[&str]) -> Self {
        self.views
            .insert(entity, views.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_related(mut self, parent: EntityRef, child: EntityRef) -> Self {
        self.related.entry(parent).or_default().push(child);
        self
    }
}

#[async_trait]
impl ViewCatalog for FixtureCatalog {
    async fn views_for(&self, entity: &EntityRef) -> VistaResult<Option<Vec<CacheKey>>> {
        match self.views.get(entity) {
            Some(views) => views
                .iter()
                .map(|v| entity.view_key(v))
                .collect::<VistaResult<Vec<_>>>()
                .map(Some),
            None => Ok(None),
        }
    }

    async fn related(&self, entity: &EntityRef, kind: EntityKind) -> VistaResult<Vec<EntityRef>> {
        Ok(self
            .related
            .get(entity)
            .map(|children| children.iter().filter(|c| c.kind == kind).cloned().collect())
            .unwrap_or_default())
    }
}

/// [`PopulationSource`] returning the same entities at every hour.
#[derive(Debug, Clone, Default)]
pub struct FixturePopulation(pub Vec<EntityRef>);

#[async_trait]
impl PopulationSource for FixturePopulation {
    async fn active_entities(
        &self,
        kind: EntityKind,
        _bucket: TimeBucket,
        limit: usize,
    ) -> VistaResult<Vec<EntityRef>> {
        Ok(self
            .0
            .iter()
            .filter(|e| e.kind == kind)
            .take(limit)
            .cloned()
            .collect())
    }
}

// ============================================================================
// RECOMPUTE HELPERS
// ============================================================================

pub mod recompute {
    //! Ready-made recompute registries.

    use super::*;

    /// Every entity view recomputes to `{"key": ..., "id": ...}` at Warm.
    pub fn echo_registry() -> VistaResult<RecomputeRegistry> {
        let mut registry = RecomputeRegistry::new();
        for kind in EntityKind::ALL {
            registry = registry.with_fn(
                &format!("{}:{{id}}:**", kind.domain()),
                CacheTier::Warm,
                |ctx| async move { Ok(json!({ "key": ctx.key, "id": ctx.capture("id") })) },
            )?;
        }
        Ok(registry)
    }

    /// One pattern whose callback returns `value` and counts its calls.
    pub fn counting_registry(
        pattern: &str,
        tier: CacheTier,
        value: Value,
        calls: Arc<AtomicU64>,
    ) -> VistaResult<RecomputeRegistry> {
        RecomputeRegistry::new().with_fn(pattern, tier, move |_ctx| {
            let value = value.clone();
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
        })
    }

    /// One pattern whose callback always fails.
    pub fn failing_registry(pattern: &str) -> VistaResult<RecomputeRegistry> {
        RecomputeRegistry::new().with_fn(pattern, CacheTier::Warm, |ctx| async move {
            Err(VistaError::backend("primary", format!("cannot rebuild {}", ctx.key)))
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for keys, SQL and query results.

    use super::*;
    use proptest::prelude::*;

    /// A valid key component.
    pub fn arb_segment() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}"
    }

    pub fn arb_entity_kind() -> impl Strategy<Value = EntityKind> {
        prop::sample::select(EntityKind::ALL.to_vec())
    }

    pub fn arb_entity_ref() -> impl Strategy<Value = EntityRef> {
        (arb_entity_kind(), 1u32..10_000).prop_map(|(kind, id)| EntityRef::new(kind, id))
    }

    pub fn arb_view() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "dashboard",
            "full",
            "orders",
            "analytics",
            "performance",
            "summary",
            "activity",
            "details",
        ])
    }

    pub fn arb_tier() -> impl Strategy<Value = CacheTier> {
        prop::sample::select(CacheTier::ALL.to_vec())
    }

    /// Discriminators with distinct names.
    pub fn arb_discriminators() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::btree_map(arb_segment(), arb_segment(), 0..4)
            .prop_map(|m| m.into_iter().collect())
    }

    /// A simple SELECT over a fixed table set.
    pub fn arb_sql() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["orders", "menus", "restaurants", "employees"]),
            prop::sample::select(vec!["id", "status", "total", "created_at"]),
            1u32..1000,
        )
            .prop_map(|(table, column, limit)| {
                format!("SELECT {} FROM {} WHERE {} > $1 LIMIT {}", column, table, column, limit)
            })
    }

    /// The same SQL with its whitespace scrambled.
    pub fn arb_whitespace_variant(sql: String) -> impl Strategy<Value = String> {
        let words: Vec<String> = sql.split_whitespace().map(str::to_string).collect();
        prop::collection::vec(prop::sample::select(vec![" ", "  ", "\n", "\t", " \n  "]), words.len())
            .prop_map(move |gaps| {
                let mut out = String::new();
                for (word, gap) in words.iter().zip(gaps) {
                    out.push_str(gap);
                    out.push_str(word);
                }
                out
            })
    }

    pub fn arb_param() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    pub fn arb_params() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(arb_param(), 0..4)
    }

    pub fn arb_query_result() -> impl Strategy<Value = QueryResult> {
        (1usize..5).prop_flat_map(|width| {
            (
                prop::collection::vec(arb_segment(), width),
                prop::collection::vec(prop::collection::vec(arb_param(), width), 0..6),
            )
                .prop_map(move |(columns, rows)| {
                    let types = vec!["text".to_string(); width];
                    QueryResult::new(columns, types, rows)
                })
        })
    }

    /// Hit and miss counts for hit-rate arithmetic.
    pub fn arb_hit_miss() -> impl Strategy<Value = (u64, u64)> {
        (0u64..500, 0u64..500)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    pub fn single_row_result() -> QueryResult {
        QueryResult::new(
            vec!["id".to_string(), "name".to_string()],
            vec!["int4".to_string(), "text".to_string()],
            vec![vec![json!(1), json!("Trattoria")]],
        )
    }

    pub fn restaurant_graph() -> VistaResult<DependencyGraph> {
        DependencyGraph::restaurant_defaults()
    }

    /// `a -> {b, c}`, `b -> d`, `c -> d`.
    pub fn diamond_graph() -> VistaResult<DependencyGraph> {
        DependencyGraph::builder()
            .rule("a", &["b", "c"])
            .rule("b", &["d"])
            .rule("c", &["d"])
            .build()
    }

    /// `a -> b`, `b -> c`, `c -> a`.
    pub fn cycle_graph() -> VistaResult<DependencyGraph> {
        DependencyGraph::builder()
            .rule("a", &["b"])
            .rule("b", &["c"])
            .rule("c", &["a"])
            .build()
    }

    /// Keys seeded by [`seed_restaurants`].
    pub const RESTAURANT_KEYS: &[&str] = &[
        "restaurant:7:dashboard",
        "restaurant:7:orders",
        "restaurant:8:dashboard",
        "menu:12:full:restaurant=7",
        "menu:13:full:restaurant=8",
        "menuitem:40:details:menu=12",
        "employee:3:summary:restaurant=7",
        "order:99:summary:restaurant=7",
    ];

    /// Two restaurants with menus, items, staff and orders.
    pub async fn seed_restaurants(store: &CacheStore) -> VistaResult<()> {
        for key in RESTAURANT_KEYS {
            store
                .put_value(key, json!({ "key": key, "name": "Old Name", "covers": 40 }), CacheTier::Warm)
                .await?;
        }
        Ok(())
    }

    /// Catalog matching [`seed_restaurants`].
    pub fn restaurant_catalog() -> FixtureCatalog {
        let restaurant = |id: u32| EntityRef::new(EntityKind::Restaurant, id);
        let menu = |id: u32| EntityRef::new(EntityKind::Menu, id);
        FixtureCatalog::new()
            .with_entity(restaurant(7), &["dashboard", "orders", "analytics"])
            .with_entity(restaurant(8), &["dashboard", "orders"])
            .with_entity(menu(12), &["full", "performance"])
            .with_entity(menu(13), &["full"])
            .with_entity(EntityRef::new(EntityKind::Employee, 3), &["summary"])
            .with_related(restaurant(7), menu(12))
            .with_related(restaurant(8), menu(13))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for Vista-specific validation.

    use super::*;

    #[track_caller]
    pub fn assert_backend_unavailable<T: std::fmt::Debug>(result: &VistaResult<T>) {
        match result {
            Err(VistaError::BackendUnavailable { .. }) => {}
            other => panic!("Expected BackendUnavailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_pattern<T: std::fmt::Debug>(result: &VistaResult<T>) {
        match result {
            Err(VistaError::InvalidKeyPattern { .. }) => {}
            other => panic!("Expected InvalidKeyPattern, got: {:?}", other),
        }
    }

    /// No key appears twice in the report's deletions.
    #[track_caller]
    pub fn assert_deleted_once(report: &InvalidationReport) {
        let mut seen = std::collections::HashSet::new();
        for key in &report.deleted {
            assert!(seen.insert(key), "{} deleted more than once", key);
        }
    }

    pub async fn assert_live(store: &CacheStore, keys: &[&str]) {
        for key in keys {
            assert!(
                store.exists(key).await.unwrap_or(false),
                "expected {} to be cached",
                key
            );
        }
    }

    pub async fn assert_gone(store: &CacheStore, keys: &[&str]) {
        for key in keys {
            assert!(
                !store.exists(key).await.unwrap_or(true),
                "expected {} to be invalidated",
                key
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_store_has_fixture_keys() {
        let store = memory_store();
        fixtures::seed_restaurants(&store).await.unwrap();
        assertions::assert_live(&store, fixtures::RESTAURANT_KEYS).await;
    }

    #[tokio::test]
    async fn test_recording_backend_logs_and_fails_on_demand() {
        let backend = Arc::new(RecordingBackend::new());
        let store = store_with(backend.clone());
        store.set("a:1", b"x".to_vec(), None).await.unwrap();
        store.delete("a:1").await.unwrap();
        assert_eq!(backend.deleted_keys(), vec!["a:1"]);

        backend.set_unavailable(true);
        assertions::assert_backend_unavailable(&store.get("a:1").await);
    }

    #[tokio::test]
    async fn test_mock_source_scripts() {
        let source = MockDataSource::new("replica").with_lag(2.5);
        assert_eq!(source.replication_lag_seconds().await.unwrap(), 2.5);
        source.set_failing(true);
        assertions::assert_backend_unavailable(&source.query("SELECT 1", &[]).await);
        assert_eq!(source.query_count(), 1);
        assert_eq!(source.last_sql().as_deref(), Some("SELECT 1"));
    }

    #[tokio::test]
    async fn test_catalog_fixture() {
        let catalog = fixtures::restaurant_catalog();
        let restaurant = EntityRef::new(EntityKind::Restaurant, 7);
        let views = catalog.views_for(&restaurant).await.unwrap().unwrap();
        assert_eq!(views.len(), 3);
        let menus = catalog.related(&restaurant, EntityKind::Menu).await.unwrap();
        assert_eq!(menus, vec![EntityRef::new(EntityKind::Menu, 12)]);
        assert!(catalog
            .views_for(&EntityRef::new(EntityKind::User, 1))
            .await
            .unwrap()
            .is_none());
    }
}
