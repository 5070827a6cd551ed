//! Tiered Cache Warmer
//!
//! Populates views ahead of demand: around a context (an entity and its
//! views), on a time-of-day schedule, in reaction to business events, and
//! right after an invalidation. Warming overwrites, so running it twice is
//! harmless, and it never fails the caller: missing entities and failed
//! recomputes are logged, counted and skipped.

use crate::recompute::RecomputeRegistry;
use crate::schedule::{TimeBucket, WarmScope};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use vista_core::config::{env_flag, env_or, env_secs};
use vista_core::{CacheKey, CacheTier, EntityKind, EntityRef, KeyPattern, VistaResult};
use vista_storage::CacheStore;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for [`Warmer`].
#[derive(Debug, Clone)]
pub struct WarmingConfig {
    /// Entities warmed per scheduled run (default: 50)
    pub batch_limit: usize,
    /// Interval between scheduled runs (default: 1 hour)
    pub schedule_interval: Duration,
    /// Offset from UTC used to pick the time bucket, in hours (default: 0)
    pub utc_offset_hours: i32,
    /// Repopulate invalidated keys immediately (default: true)
    pub rewarm_after_invalidation: bool,
    /// Lowest view priority worth rewarming (default: 5)
    pub rewarm_min_priority: u8,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            batch_limit: 50,
            schedule_interval: Duration::from_secs(60 * 60),
            utc_offset_hours: 0,
            rewarm_after_invalidation: true,
            rewarm_min_priority: 5,
        }
    }
}

impl WarmingConfig {
    /// Create WarmingConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VISTA_WARM_BATCH_LIMIT`: entities per scheduled run (default: 50)
    /// - `VISTA_WARM_SCHEDULE_INTERVAL_SECS`: scheduled run interval (default: 3600)
    /// - `VISTA_WARM_UTC_OFFSET_HOURS`: local time offset (default: 0)
    /// - `VISTA_REWARM_AFTER_INVALIDATION`: rewarm deleted keys (default: true)
    /// - `VISTA_REWARM_MIN_PRIORITY`: priority cutoff for rewarming (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_limit: env_or("VISTA_WARM_BATCH_LIMIT", defaults.batch_limit),
            schedule_interval: env_secs(
                "VISTA_WARM_SCHEDULE_INTERVAL_SECS",
                defaults.schedule_interval,
            ),
            utc_offset_hours: env_or("VISTA_WARM_UTC_OFFSET_HOURS", defaults.utc_offset_hours),
            rewarm_after_invalidation: env_flag(
                "VISTA_REWARM_AFTER_INVALIDATION",
                defaults.rewarm_after_invalidation,
            ),
            rewarm_min_priority: env_or("VISTA_REWARM_MIN_PRIORITY", defaults.rewarm_min_priority),
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_utc_offset(mut self, hours: i32) -> Self {
        self.utc_offset_hours = hours;
        self
    }

    pub fn with_rewarm(mut self, enabled: bool) -> Self {
        self.rewarm_after_invalidation = enabled;
        self
    }

    pub fn with_rewarm_min_priority(mut self, priority: u8) -> Self {
        self.rewarm_min_priority = priority;
        self
    }
}

// ============================================================================
// DOMAIN SEAMS
// ============================================================================

/// Knows which views exist for an entity.
#[async_trait]
pub trait ViewCatalog: Send + Sync {
    /// Keys of every view of `entity`, or `None` when the entity does not exist.
    async fn views_for(&self, entity: &EntityRef) -> VistaResult<Option<Vec<CacheKey>>>;

    /// Entities of `kind` related to `entity`, e.g. the menus of a restaurant.
    async fn related(&self, entity: &EntityRef, kind: EntityKind) -> VistaResult<Vec<EntityRef>>;
}

/// Knows which entities are worth warming right now.
#[async_trait]
pub trait PopulationSource: Send + Sync {
    async fn active_entities(
        &self,
        kind: EntityKind,
        bucket: TimeBucket,
        limit: usize,
    ) -> VistaResult<Vec<EntityRef>>;
}

/// Ids a business event may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub restaurant_id: Option<String>,
    pub menu_id: Option<String>,
    pub employee_id: Option<String>,
}

impl EventContext {
    pub fn restaurant(id: impl ToString) -> Self {
        Self {
            restaurant_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn menu(id: impl ToString) -> Self {
        Self {
            menu_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_employee(mut self, id: impl ToString) -> Self {
        self.employee_id = Some(id.to_string());
        self
    }
}

/// Rewarm priority of a key, from its view segment.
pub fn view_priority(key: &str) -> u8 {
    match key.split(':').nth(2) {
        Some("dashboard") => 10,
        Some("full") => 9,
        Some("orders") => 8,
        Some("analytics") => 7,
        Some("performance") => 6,
        Some("summary") => 5,
        Some("activity") => 4,
        _ => 0,
    }
}

// ============================================================================
// REPORTS AND METRICS
// ============================================================================

/// Outcome of a warming run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmReport {
    /// Keys written
    pub warmed: usize,
    /// Entities visited
    pub entities: usize,
    /// Keys or entities with nothing to do
    pub skipped: usize,
    /// Recompute or store failures
    pub failures: usize,
    /// Stopped early by cancellation
    pub cancelled: bool,
}

impl WarmReport {
    pub fn merge(&mut self, other: WarmReport) {
        self.warmed += other.warmed;
        self.entities += other.entities;
        self.skipped += other.skipped;
        self.failures += other.failures;
        self.cancelled |= other.cancelled;
    }
}

/// Lifetime counters for a warmer.
#[derive(Debug, Default)]
pub struct WarmerMetrics {
    pub keys_warmed: AtomicU64,
    pub failures: AtomicU64,
    pub scheduled_runs: AtomicU64,
    pub events: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WarmerSnapshot {
    pub keys_warmed: u64,
    pub failures: u64,
    pub scheduled_runs: u64,
    pub events: u64,
}

impl WarmerMetrics {
    pub fn snapshot(&self) -> WarmerSnapshot {
        WarmerSnapshot {
            keys_warmed: self.keys_warmed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            scheduled_runs: self.scheduled_runs.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// WARMER
// ============================================================================

#[derive(Clone)]
pub struct Warmer {
    store: CacheStore,
    recomputes: Arc<RecomputeRegistry>,
    catalog: Arc<dyn ViewCatalog>,
    population: Option<Arc<dyn PopulationSource>>,
    config: WarmingConfig,
    metrics: Arc<WarmerMetrics>,
    cancel: Option<watch::Receiver<bool>>,
}

impl std::fmt::Debug for Warmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Warmer")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl Warmer {
    pub fn new(
        store: CacheStore,
        recomputes: Arc<RecomputeRegistry>,
        catalog: Arc<dyn ViewCatalog>,
        config: WarmingConfig,
    ) -> Self {
        Self {
            store,
            recomputes,
            catalog,
            population: None,
            config,
            metrics: Arc::new(WarmerMetrics::default()),
            cancel: None,
        }
    }

    pub fn with_population(mut self, population: Arc<dyn PopulationSource>) -> Self {
        self.population = Some(population);
        self
    }

    /// Stop long runs between entities once `rx` reads `true`.
    pub fn with_cancellation(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }

    pub fn config(&self) -> &WarmingConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<WarmerMetrics> {
        &self.metrics
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Recompute one key and write it at `tier`, or at its registered tier.
    async fn warm_key(&self, key: &str, tier: Option<CacheTier>, report: &mut WarmReport) {
        let (value, registered) = match self.recomputes.recompute(key, self.store.metrics()).await {
            None => {
                tracing::debug!(key = %key, "No recompute callback, skipping");
                report.skipped += 1;
                return;
            }
            Some(Err(e)) => {
                tracing::error!(key = %key, error = %e, "Warming recompute failed");
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                report.failures += 1;
                return;
            }
            Some(Ok(computed)) => computed,
        };

        let tier = tier.unwrap_or(registered);
        match self.store.put_value(key, value, tier).await {
            Ok(_) => {
                tracing::trace!(key = %key, tier = %tier, "Warmed");
                self.metrics.keys_warmed.fetch_add(1, Ordering::Relaxed);
                report.warmed += 1;
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "Warming write failed");
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                report.failures += 1;
            }
        }
    }

    /// Warm every view of `entity` in `scope` at `tier`.
    pub async fn warm_context(
        &self,
        entity: &EntityRef,
        tier: CacheTier,
        scope: &WarmScope,
    ) -> WarmReport {
        let mut report = WarmReport::default();

        let views = match self.catalog.views_for(entity).await {
            Ok(Some(views)) => views,
            Ok(None) => {
                tracing::warn!(entity = %entity, "Entity not found, nothing to warm");
                report.skipped += 1;
                return report;
            }
            Err(e) => {
                tracing::error!(entity = %entity, error = %e, "Could not list views");
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                report.failures += 1;
                return report;
            }
        };

        report.entities += 1;
        for key in views.iter().filter(|k| scope.includes(k.as_str())) {
            self.warm_key(key.as_str(), Some(tier), &mut report).await;
        }

        tracing::debug!(entity = %entity, tier = %tier, warmed = report.warmed, "Context warmed");
        report
    }

    /// Warm what the local time of `now` calls for.
    pub async fn warm_scheduled(&self, now: DateTime<Utc>) -> WarmReport {
        let mut report = WarmReport::default();
        let local = now + ChronoDuration::hours(i64::from(self.config.utc_offset_hours));
        let Some(bucket) = TimeBucket::for_hour(local.hour()) else {
            tracing::debug!(hour = local.hour(), "No warming plan for this hour");
            return report;
        };
        let Some(population) = &self.population else {
            tracing::warn!(bucket = %bucket, "No population source, scheduled warming skipped");
            return report;
        };

        self.metrics.scheduled_runs.fetch_add(1, Ordering::Relaxed);
        tracing::info!(bucket = %bucket, batch_limit = self.config.batch_limit, "Scheduled warming started");

        let mut budget = self.config.batch_limit;
        'plan: for step in bucket.plan() {
            if budget == 0 {
                break;
            }
            let entities = match population.active_entities(step.kind, bucket, budget).await {
                Ok(entities) => entities,
                Err(e) => {
                    tracing::error!(kind = %step.kind, error = %e, "Could not load active entities");
                    report.failures += 1;
                    continue;
                }
            };
            for entity in entities.into_iter().take(budget) {
                if self.is_cancelled() {
                    tracing::info!(bucket = %bucket, "Scheduled warming cancelled");
                    report.cancelled = true;
                    break 'plan;
                }
                budget -= 1;
                report.merge(self.warm_context(&entity, step.tier, &step.scope).await);
            }
        }

        tracing::info!(
            bucket = %bucket,
            warmed = report.warmed,
            entities = report.entities,
            failures = report.failures,
            "Scheduled warming completed"
        );
        report
    }

    /// React to a named business event.
    pub async fn warm_for_event(&self, name: &str, context: &EventContext) -> WarmReport {
        self.metrics.events.fetch_add(1, Ordering::Relaxed);
        let restaurant = context
            .restaurant_id
            .as_ref()
            .map(|id| EntityRef::new(EntityKind::Restaurant, id));

        let report = match (name, &restaurant) {
            ("menu_updated", _) => match &context.menu_id {
                Some(id) => self.rewarm_menu(EntityRef::new(EntityKind::Menu, id)).await,
                None => return missing_context(name, "menu_id"),
            },
            ("order_placed", Some(restaurant)) => {
                self.warm_context(
                    restaurant,
                    CacheTier::Hot,
                    &WarmScope::views(&["dashboard", "orders"]),
                )
                .await
            }
            ("employee_login", Some(restaurant)) => {
                let Some(employee_id) = &context.employee_id else {
                    return missing_context(name, "employee_id");
                };
                let mut report = self.warm_context(restaurant, CacheTier::Hot, &WarmScope::All).await;
                let employee = EntityRef::new(EntityKind::Employee, employee_id);
                report.merge(self.warm_context(&employee, CacheTier::Hot, &WarmScope::All).await);
                report
            }
            ("peak_hours_approaching", Some(restaurant)) => {
                let mut report = self.warm_context(restaurant, CacheTier::Hot, &WarmScope::All).await;
                match self.catalog.related(restaurant, EntityKind::Menu).await {
                    Ok(menus) => {
                        for menu in &menus {
                            if self.is_cancelled() {
                                report.cancelled = true;
                                break;
                            }
                            report.merge(self.warm_context(menu, CacheTier::Hot, &WarmScope::All).await);
                        }
                    }
                    Err(e) => {
                        tracing::error!(entity = %restaurant, error = %e, "Could not list menus");
                        report.failures += 1;
                    }
                }
                report
            }
            ("order_placed" | "employee_login" | "peak_hours_approaching", None) => {
                return missing_context(name, "restaurant_id");
            }
            _ => {
                tracing::warn!(event = %name, "Unknown warming event");
                return WarmReport::default();
            }
        };

        tracing::info!(event = %name, warmed = report.warmed, failures = report.failures, "Event warming completed");
        report
    }

    async fn rewarm_menu(&self, menu: EntityRef) -> WarmReport {
        let pattern = format!("{}:{}:*", menu.kind.domain(), menu.id);
        match KeyPattern::parse(pattern) {
            Ok(pattern) => {
                if let Err(e) = self.store.delete_matching(&pattern).await {
                    tracing::warn!(entity = %menu, error = %e, "Could not drop stale menu views");
                }
            }
            Err(e) => tracing::warn!(entity = %menu, error = %e, "Invalid menu id"),
        }
        self.warm_context(&menu, CacheTier::Hot, &WarmScope::All).await
    }

    /// Repopulate invalidated keys, most valuable views first.
    ///
    /// Keys below the configured minimum priority are skipped. With no
    /// `tier` each key is written at the tier its callback registered.
    pub async fn rewarm_keys(&self, keys: &[String], tier: Option<CacheTier>) -> WarmReport {
        let mut report = WarmReport::default();
        let mut ranked: Vec<(u8, &String)> = keys
            .iter()
            .map(|k| (view_priority(k), k))
            .filter(|(priority, _)| *priority >= self.config.rewarm_min_priority)
            .collect();
        report.skipped += keys.len() - ranked.len();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        for (priority, key) in ranked {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            tracing::trace!(key = %key, priority, "Rewarming");
            self.warm_key(key, tier, &mut report).await;
        }
        if report.warmed > 0 {
            tracing::debug!(warmed = report.warmed, skipped = report.skipped, "Rewarm completed");
        }
        report
    }
}

fn missing_context(event: &str, field: &str) -> WarmReport {
    tracing::warn!(event = %event, field = %field, "Event is missing context, nothing warmed");
    WarmReport::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::collections::HashMap;
    use vista_storage::{MemoryBackend, MetricsCollector, MetricsConfig, StoreConfig};

    struct Catalog {
        views: HashMap<EntityRef, Vec<&'static str>>,
        menus: Vec<EntityRef>,
    }

    #[async_trait]
    impl ViewCatalog for Catalog {
        async fn views_for(&self, entity: &EntityRef) -> VistaResult<Option<Vec<CacheKey>>> {
            self.views
                .get(entity)
                .map(|views| {
                    views
                        .iter()
                        .map(|v| entity.view_key(v))
                        .collect::<VistaResult<Vec<_>>>()
                })
                .transpose()
        }

        async fn related(&self, _entity: &EntityRef, _kind: EntityKind) -> VistaResult<Vec<EntityRef>> {
            Ok(self.menus.clone())
        }
    }

    struct Everyone(Vec<EntityRef>);

    #[async_trait]
    impl PopulationSource for Everyone {
        async fn active_entities(
            &self,
            kind: EntityKind,
            _bucket: TimeBucket,
            limit: usize,
        ) -> VistaResult<Vec<EntityRef>> {
            Ok(self.0.iter().filter(|e| e.kind == kind).take(limit).cloned().collect())
        }
    }

    fn restaurant(id: u32) -> EntityRef {
        EntityRef::new(EntityKind::Restaurant, id)
    }

    fn menu(id: u32) -> EntityRef {
        EntityRef::new(EntityKind::Menu, id)
    }

    fn warmer(config: WarmingConfig) -> (Warmer, CacheStore) {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let store = CacheStore::new(Arc::new(MemoryBackend::new()), metrics, StoreConfig::default());
        let registry = RecomputeRegistry::new()
            .with_fn("restaurant:{id}:*", CacheTier::Warm, |ctx| async move {
                Ok(json!({ "key": ctx.key }))
            })
            .unwrap()
            .with_fn("menu:{id}:*", CacheTier::Warm, |ctx| async move {
                Ok(json!({ "menu": ctx.capture("id") }))
            })
            .unwrap();
        let catalog = Catalog {
            views: HashMap::from([
                (restaurant(7), vec!["dashboard", "orders", "analytics"]),
                (restaurant(8), vec!["dashboard", "orders", "analytics"]),
                (menu(12), vec!["full", "performance"]),
            ]),
            menus: vec![menu(12)],
        };
        let population = Everyone(vec![restaurant(7), restaurant(8), menu(12)]);
        let warmer = Warmer::new(store.clone(), Arc::new(registry), Arc::new(catalog), config)
            .with_population(Arc::new(population));
        (warmer, store)
    }

    #[tokio::test]
    async fn test_context_warming_respects_scope() {
        let (warmer, store) = warmer(WarmingConfig::default());
        let report = warmer
            .warm_context(&restaurant(7), CacheTier::Hot, &WarmScope::views(&["dashboard"]))
            .await;
        assert_eq!(report.warmed, 1);
        assert!(store.exists("restaurant:7:dashboard").await.unwrap());
        assert!(!store.exists("restaurant:7:orders").await.unwrap());

        let entry: vista_storage::CacheEntry<serde_json::Value> =
            store.peek_entry("restaurant:7:dashboard").await.unwrap().unwrap();
        assert_eq!(entry.tier, CacheTier::Hot);
    }

    #[tokio::test]
    async fn test_missing_entity_is_a_noop() {
        let (warmer, _store) = warmer(WarmingConfig::default());
        let report = warmer.warm_context(&restaurant(99), CacheTier::Hot, &WarmScope::All).await;
        assert_eq!(report.warmed, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures, 0);
    }

    #[tokio::test]
    async fn test_scheduled_dinner_run() {
        let (warmer, store) = warmer(WarmingConfig::default());
        let dinner = Utc.with_ymd_and_hms(2026, 3, 2, 19, 0, 0).unwrap();
        let report = warmer.warm_scheduled(dinner).await;

        assert_eq!(report.entities, 3);
        assert!(store.exists("menu:12:full").await.unwrap());
        assert!(store.exists("restaurant:8:orders").await.unwrap());
        assert!(!store.exists("restaurant:8:dashboard").await.unwrap());
    }

    #[tokio::test]
    async fn test_scheduled_run_honours_offset_and_gap() {
        let (warmer, _store) = warmer(WarmingConfig::default().with_utc_offset(-3));
        // 18:00 UTC is 15:00 local, which has no plan
        let afternoon = Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap();
        assert_eq!(warmer.warm_scheduled(afternoon).await, WarmReport::default());
    }

    #[tokio::test]
    async fn test_batch_limit_bounds_a_run() {
        let (warmer, _store) = warmer(WarmingConfig::default().with_batch_limit(1));
        let dinner = Utc.with_ymd_and_hms(2026, 3, 2, 19, 0, 0).unwrap();
        let report = warmer.warm_scheduled(dinner).await;
        assert_eq!(report.entities, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_between_entities() {
        let (tx, rx) = watch::channel(false);
        let (warmer, _store) = warmer(WarmingConfig::default());
        let warmer = warmer.with_cancellation(rx);
        tx.send(true).unwrap();

        let dinner = Utc.with_ymd_and_hms(2026, 3, 2, 19, 0, 0).unwrap();
        let report = warmer.warm_scheduled(dinner).await;
        assert!(report.cancelled);
        assert_eq!(report.entities, 0);
    }

    #[tokio::test]
    async fn test_menu_updated_drops_then_warms() {
        let (warmer, store) = warmer(WarmingConfig::default());
        store
            .put_value("menu:12:stale", json!({ "old": true }), CacheTier::Warm)
            .await
            .unwrap();

        let report = warmer.warm_for_event("menu_updated", &EventContext::menu(12)).await;
        assert_eq!(report.warmed, 2);
        assert!(!store.exists("menu:12:stale").await.unwrap());
        assert!(store.exists("menu:12:full").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_or_incomplete_events_are_noops() {
        let (warmer, _store) = warmer(WarmingConfig::default());
        assert_eq!(
            warmer.warm_for_event("lunar_eclipse", &EventContext::restaurant(7)).await,
            WarmReport::default()
        );
        assert_eq!(
            warmer.warm_for_event("order_placed", &EventContext::default()).await,
            WarmReport::default()
        );
        assert_eq!(warmer.metrics().snapshot().events, 2);
    }

    #[tokio::test]
    async fn test_peak_hours_warms_related_menus() {
        let (warmer, store) = warmer(WarmingConfig::default());
        let report = warmer
            .warm_for_event("peak_hours_approaching", &EventContext::restaurant(7))
            .await;
        assert_eq!(report.entities, 2);
        assert!(store.exists("menu:12:performance").await.unwrap());
    }

    #[tokio::test]
    async fn test_rewarm_orders_by_priority_and_skips_low_value() {
        let (warmer, store) = warmer(WarmingConfig::default());
        let keys = vec![
            "restaurant:7:activity".to_string(),
            "restaurant:7:orders".to_string(),
            "restaurant:7:dashboard".to_string(),
        ];
        let report = warmer.rewarm_keys(&keys, None).await;
        assert_eq!(report.warmed, 2);
        assert_eq!(report.skipped, 1);
        assert!(!store.exists("restaurant:7:activity").await.unwrap());

        let entry: vista_storage::CacheEntry<serde_json::Value> =
            store.peek_entry("restaurant:7:orders").await.unwrap().unwrap();
        assert_eq!(entry.tier, CacheTier::Warm);
    }

    #[test]
    fn test_view_priorities() {
        assert_eq!(view_priority("restaurant:7:dashboard"), 10);
        assert_eq!(view_priority("menu:12:full:locale=en"), 9);
        assert_eq!(view_priority("restaurant:7"), 0);
    }
}
