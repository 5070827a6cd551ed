//! Cache service facade
//!
//! The integration surface a host application talks to. It wires the store,
//! invalidator, warmer, and optionally the query router and L2 cache, and
//! exposes domain hooks plus operator inspection.

use crate::graph::DependencyGraph;
use crate::invalidator::{DependencyNode, ImpactAnalysis, InvalidationReport, Invalidator};
use crate::jobs::{
    registry_prune_task, schedule_task, warm_worker_task, RegistryPruneMetrics, ScheduleMetrics,
    WarmRequest, WarmWorkerMetrics,
};
use crate::recompute::RecomputeRegistry;
use crate::warmer::{EventContext, PopulationSource, ViewCatalog, WarmReport, Warmer, WarmingConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use vista_core::{ConfigError, EntityChange, VistaResult};
use vista_query::{
    health_monitor_task, ConnectionStats, HealthMonitorMetrics, L2QueryCache, QueryRouter,
    RouterConfig,
};
use vista_storage::metrics::Recommendation;
use vista_storage::{
    CacheHealthReport, CacheStats, CacheStore, ExportFormat, MetricsConfig, StoreConfig,
};

/// Capacity of the warm request queue.
const WARM_QUEUE_CAPACITY: usize = 64;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Every component's configuration in one place.
#[derive(Debug, Clone, Default)]
pub struct VistaConfig {
    pub store: StoreConfig,
    pub router: RouterConfig,
    pub warming: WarmingConfig,
    pub metrics: MetricsConfig,
}

impl VistaConfig {
    /// Load every section from its `VISTA_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            store: StoreConfig::from_env(),
            router: RouterConfig::from_env(),
            warming: WarmingConfig::from_env(),
            metrics: MetricsConfig::from_env(),
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// Result of handling one entity change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeOutcome {
    pub invalidation: InvalidationReport,
    /// Present when deleted keys were rewarmed
    pub rewarm: Option<WarmReport>,
}

/// Handles for the service's background tasks. Each task hands back its
/// metrics when it stops.
#[derive(Debug)]
pub struct ServiceJobs {
    /// Enqueue extra warming work
    pub warm_tx: mpsc::Sender<WarmRequest>,
    pub warm_worker: JoinHandle<Arc<WarmWorkerMetrics>>,
    pub schedule: JoinHandle<Arc<ScheduleMetrics>>,
    /// Present when pattern operations go through the key registry
    pub registry_prune: Option<JoinHandle<Arc<RegistryPruneMetrics>>>,
    /// Present with a router
    pub health_monitor: Option<JoinHandle<Arc<HealthMonitorMetrics>>>,
}

/// What the background tasks counted over their lifetime. A task that did
/// not finish cleanly reports `None`.
#[derive(Debug, Default)]
pub struct JobMetrics {
    pub warm_worker: Option<Arc<WarmWorkerMetrics>>,
    pub schedule: Option<Arc<ScheduleMetrics>>,
    pub registry_prune: Option<Arc<RegistryPruneMetrics>>,
    pub health_monitor: Option<Arc<HealthMonitorMetrics>>,
}

impl ServiceJobs {
    /// Wait for every task and collect its metrics.
    ///
    /// The tasks only stop once the shutdown channel reads `true`.
    pub async fn join(self) -> JobMetrics {
        drop(self.warm_tx);
        let registry_prune = match self.registry_prune {
            Some(handle) => joined("registry_prune", handle).await,
            None => None,
        };
        let health_monitor = match self.health_monitor {
            Some(handle) => joined("health_monitor", handle).await,
            None => None,
        };
        JobMetrics {
            warm_worker: joined("warm_worker", self.warm_worker).await,
            schedule: joined("schedule", self.schedule).await,
            registry_prune,
            health_monitor,
        }
    }
}

async fn joined<T>(task: &'static str, handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(metrics) => Some(metrics),
        Err(e) => {
            tracing::error!(task, error = %e, "Background task did not finish cleanly");
            None
        }
    }
}

#[derive(Clone)]
pub struct CacheService {
    store: CacheStore,
    invalidator: Invalidator,
    warmer: Warmer,
    router: Option<QueryRouter>,
    l2: Option<L2QueryCache>,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("store", &self.store)
            .field("invalidator", &self.invalidator)
            .field("router", &self.router.is_some())
            .finish()
    }
}

impl CacheService {
    pub fn builder(store: CacheStore) -> CacheServiceBuilder {
        CacheServiceBuilder::new(store)
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn invalidator(&self) -> &Invalidator {
        &self.invalidator
    }

    pub fn warmer(&self) -> &Warmer {
        &self.warmer
    }

    pub fn router(&self) -> Option<&QueryRouter> {
        self.router.as_ref()
    }

    pub fn l2(&self) -> Option<&L2QueryCache> {
        self.l2.as_ref()
    }

    // ------------------------------------------------------------------------
    // Domain hooks
    // ------------------------------------------------------------------------

    /// Invalidate what a domain write made stale, then optionally rewarm
    /// the deleted keys that are worth it.
    pub async fn on_entity_changed(&self, change: &EntityChange) -> VistaResult<ChangeOutcome> {
        let invalidation = self.invalidator.invalidate_for_entity_change(change).await?;

        let rewarm = if self.warmer.config().rewarm_after_invalidation
            && !invalidation.deleted.is_empty()
        {
            Some(self.warmer.rewarm_keys(&invalidation.deleted, None).await)
        } else {
            None
        };

        Ok(ChangeOutcome {
            invalidation,
            rewarm,
        })
    }

    pub async fn on_domain_event(&self, name: &str, context: &EventContext) -> WarmReport {
        self.warmer.warm_for_event(name, context).await
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    pub async fn cache_stats(&self) -> CacheStats {
        self.store.stats().await
    }

    pub async fn cache_health_check(&self) -> CacheHealthReport {
        self.store.health_check().await
    }

    pub fn export_metrics(&self, format: ExportFormat) -> VistaResult<String> {
        self.store.metrics().export(format)
    }

    pub async fn dependency_tree(&self, key: &str) -> VistaResult<DependencyNode> {
        self.invalidator.dependency_tree(key).await
    }

    pub async fn analyze_invalidation_impact(&self, key: &str) -> VistaResult<ImpactAnalysis> {
        self.invalidator.analyze_invalidation_impact(key).await
    }

    /// Pool and replica state, `None` when no router is configured.
    pub fn connection_stats(&self) -> Option<ConnectionStats> {
        self.router.as_ref().map(QueryRouter::connection_stats)
    }

    pub async fn recommendations(&self) -> Vec<Recommendation> {
        let memory = match self.store.memory_stats().await {
            Ok(memory) => memory,
            Err(e) => {
                tracing::warn!(error = %e, "Memory stats unavailable for recommendations");
                None
            }
        };
        self.store.metrics().generate_recommendations(memory.as_ref())
    }

    pub fn reset_metrics(&self) -> DateTime<Utc> {
        let at = self.store.metrics().reset();
        tracing::info!(reset_at = %at, "Cache metrics reset");
        at
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    /// Spawn the warm worker and the warm schedule, plus the registry prune
    /// without a native scan and the replica health monitor with a router.
    /// All stop when `shutdown_rx` reads `true`.
    pub fn spawn_jobs(&self, shutdown_rx: watch::Receiver<bool>) -> ServiceJobs {
        let (warm_tx, warm_rx) = mpsc::channel(WARM_QUEUE_CAPACITY);
        let warmer = self.warmer.clone().with_cancellation(shutdown_rx.clone());
        let warm_worker = tokio::spawn(warm_worker_task(warmer, warm_rx, shutdown_rx.clone()));
        let schedule = tokio::spawn(schedule_task(
            warm_tx.clone(),
            self.warmer.config().schedule_interval,
            shutdown_rx.clone(),
        ));
        let registry_prune = self.store.uses_key_registry().then(|| {
            let every = self.store.config().registry_prune_interval;
            tokio::spawn(registry_prune_task(
                self.store.clone(),
                every.max(Duration::from_secs(1)),
                shutdown_rx.clone(),
            ))
        });
        let health_monitor = self.router.as_ref().map(|router| {
            let every = router.config().health_cache_window / 2;
            tokio::spawn(health_monitor_task(
                router.clone(),
                every.max(Duration::from_secs(1)),
                shutdown_rx.clone(),
            ))
        });
        ServiceJobs {
            warm_tx,
            warm_worker,
            schedule,
            registry_prune,
            health_monitor,
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

pub struct CacheServiceBuilder {
    store: CacheStore,
    graph: Option<DependencyGraph>,
    recomputes: RecomputeRegistry,
    catalog: Option<Arc<dyn ViewCatalog>>,
    population: Option<Arc<dyn PopulationSource>>,
    router: Option<QueryRouter>,
    l2: bool,
    warming: WarmingConfig,
}

impl CacheServiceBuilder {
    pub fn new(store: CacheStore) -> Self {
        Self {
            store,
            graph: None,
            recomputes: RecomputeRegistry::new(),
            catalog: None,
            population: None,
            router: None,
            l2: false,
            warming: WarmingConfig::default(),
        }
    }

    /// Dependency rules. Defaults to the restaurant rule set.
    pub fn graph(mut self, graph: DependencyGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn recomputes(mut self, registry: RecomputeRegistry) -> Self {
        self.recomputes = registry;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn ViewCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn population(mut self, population: Arc<dyn PopulationSource>) -> Self {
        self.population = Some(population);
        self
    }

    /// Route queries through `router`, caching results in the L2 cache.
    pub fn router(mut self, router: QueryRouter) -> Self {
        self.router = Some(router);
        self.l2 = true;
        self
    }

    /// Route queries without an L2 cache in front.
    pub fn without_l2(mut self) -> Self {
        self.l2 = false;
        self
    }

    pub fn warming(mut self, config: WarmingConfig) -> Self {
        self.warming = config;
        self
    }

    /// Fails without a view catalog, or when a shared backend would fall
    /// back to the in-process key registry.
    pub fn build(self) -> VistaResult<CacheService> {
        self.store.ensure_pattern_support()?;
        let catalog = self.catalog.ok_or_else(|| ConfigError::MissingRequired {
            field: "view_catalog".to_string(),
        })?;
        let graph = match self.graph {
            Some(graph) => graph,
            None => DependencyGraph::restaurant_defaults()?,
        };
        let recomputes = Arc::new(self.recomputes);

        let invalidator = Invalidator::new(Arc::new(graph), self.store.clone(), Arc::clone(&recomputes));
        let mut warmer = Warmer::new(self.store.clone(), recomputes, catalog, self.warming);
        if let Some(population) = self.population {
            warmer = warmer.with_population(population);
        }
        let l2 = match (&self.router, self.l2) {
            (Some(router), true) => Some(L2QueryCache::new(self.store.clone(), router.clone())),
            _ => None,
        };

        tracing::info!(
            rules = invalidator.graph().len(),
            router = self.router.is_some(),
            l2 = l2.is_some(),
            "Cache service ready"
        );
        Ok(CacheService {
            store: self.store,
            invalidator,
            warmer,
            router: self.router,
            l2,
        })
    }
}
