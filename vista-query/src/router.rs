//! Replica-Aware Query Router
//!
//! Picks a data source per query from its type and consistency requirement,
//! using the cached health of the replica. Request paths never wait on a
//! health probe: a stale state counts as unhealthy and a background refresh
//! is started instead.

use crate::health::{HealthCache, ReplicaHealthState};
use crate::source::{Consistency, DataSource, PoolStats, QueryResult, QueryType, RouteTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vista_core::config::{env_flag, env_millis, env_or, env_secs};
use vista_core::{VistaError, VistaResult};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for [`QueryRouter`].
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Lag above which the replica is unhealthy, in seconds (default: 5.0)
    pub replica_lag_threshold_secs: f64,
    /// How long a health state is trusted (default: 30 seconds)
    pub health_cache_window: Duration,
    /// Deadline for routed queries (default: 30 seconds)
    pub query_timeout: Duration,
    /// Deadline for each health probe step (default: 2 seconds)
    pub probe_timeout: Duration,
    /// When false the replica is assumed healthy and never probed
    pub health_checks_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            replica_lag_threshold_secs: 5.0,
            health_cache_window: Duration::from_secs(30),
            query_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(2),
            health_checks_enabled: true,
        }
    }
}

impl RouterConfig {
    /// Create RouterConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `VISTA_REPLICA_LAG_THRESHOLD_SECS`: lag threshold (default: 5.0)
    /// - `VISTA_HEALTH_CACHE_SECS`: health state window (default: 30)
    /// - `VISTA_QUERY_TIMEOUT_MS`: routed query deadline (default: 30000)
    /// - `VISTA_PROBE_TIMEOUT_MS`: probe step deadline (default: 2000)
    /// - `VISTA_HEALTH_CHECKS_ENABLED`: probe the replica (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            replica_lag_threshold_secs: env_or(
                "VISTA_REPLICA_LAG_THRESHOLD_SECS",
                defaults.replica_lag_threshold_secs,
            ),
            health_cache_window: env_secs("VISTA_HEALTH_CACHE_SECS", defaults.health_cache_window),
            query_timeout: env_millis("VISTA_QUERY_TIMEOUT_MS", defaults.query_timeout),
            probe_timeout: env_millis("VISTA_PROBE_TIMEOUT_MS", defaults.probe_timeout),
            health_checks_enabled: env_flag(
                "VISTA_HEALTH_CHECKS_ENABLED",
                defaults.health_checks_enabled,
            ),
        }
    }

    pub fn with_lag_threshold(mut self, seconds: f64) -> Self {
        self.replica_lag_threshold_secs = seconds;
        self
    }

    pub fn with_health_cache_window(mut self, window: Duration) -> Self {
        self.health_cache_window = window;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_health_checks(mut self, enabled: bool) -> Self {
        self.health_checks_enabled = enabled;
        self
    }
}

// ============================================================================
// DECISION TABLE
// ============================================================================

/// Pure routing decision.
///
/// Analytics and reporting always go to the analytics class of source;
/// writes, transactions and strong reads go to the primary; everything
/// else goes to the replica only while it is healthy.
pub fn decide(query_type: QueryType, consistency: Consistency, replica_healthy: bool) -> RouteTarget {
    match (query_type, consistency) {
        (QueryType::Analytics | QueryType::Reporting, _) => RouteTarget::Analytics,
        (QueryType::Write | QueryType::Transaction, _) => RouteTarget::Primary,
        (QueryType::Read, Consistency::Strong | Consistency::Immediate) => RouteTarget::Primary,
        (QueryType::Read | QueryType::Unspecified, _) if replica_healthy => RouteTarget::Replica,
        (QueryType::Read | QueryType::Unspecified, _) => RouteTarget::Primary,
    }
}

// ============================================================================
// STATS
// ============================================================================

#[derive(Debug, Default)]
struct RouterCounters {
    primary: AtomicU64,
    replica: AtomicU64,
    analytics: AtomicU64,
    fallbacks: AtomicU64,
    replica_fallbacks: AtomicU64,
    probes: AtomicU64,
}

/// Routing counters since startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub primary: u64,
    pub replica: u64,
    pub analytics: u64,
    /// Secondary failures retried on the primary
    pub fallbacks: u64,
    /// Reads sent to the primary because the replica was unhealthy
    pub replica_fallbacks: u64,
    pub probes: u64,
}

/// Pool usage of one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PoolReport {
    Available {
        size: usize,
        busy: usize,
        available: usize,
        utilization: f64,
    },
    NotConfigured,
    Error {
        reason: String,
    },
}

impl From<PoolStats> for PoolReport {
    fn from(stats: PoolStats) -> Self {
        Self::Available {
            size: stats.size,
            busy: stats.busy,
            available: stats.available,
            utilization: stats.utilization(),
        }
    }
}

/// Pool usage across every target, plus replica health.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub primary: PoolReport,
    pub replica: PoolReport,
    pub analytics: PoolReport,
    pub replica_lag_seconds: Option<f64>,
    pub replica_healthy: bool,
    pub timestamp: DateTime<Utc>,
}

/// A query result with where it was served from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedResult {
    pub target: RouteTarget,
    /// True when the chosen target failed and the primary answered instead
    pub fell_back: bool,
    pub result: QueryResult,
}

// ============================================================================
// ROUTER
// ============================================================================

struct RouterInner {
    primary: Arc<dyn DataSource>,
    replica: Option<Arc<dyn DataSource>>,
    analytics: Option<Arc<dyn DataSource>>,
    health: HealthCache,
    config: RouterConfig,
    counters: RouterCounters,
}

/// Shared router handle. Cheap to clone.
#[derive(Clone)]
pub struct QueryRouter {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for QueryRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRouter")
            .field("primary", &self.inner.primary.name())
            .field("replica", &self.inner.replica.as_ref().map(|s| s.name().to_string()))
            .field("analytics", &self.inner.analytics.as_ref().map(|s| s.name().to_string()))
            .field("config", &self.inner.config)
            .finish()
    }
}

impl QueryRouter {
    pub fn new(primary: Arc<dyn DataSource>, config: RouterConfig) -> Self {
        Self::with_sources(primary, None, None, config)
    }

    pub fn with_sources(
        primary: Arc<dyn DataSource>,
        replica: Option<Arc<dyn DataSource>>,
        analytics: Option<Arc<dyn DataSource>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                primary,
                replica,
                analytics,
                health: HealthCache::new(config.health_cache_window),
                config,
                counters: RouterCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Whether a source is configured for a target. The primary always is.
    pub fn is_configured(&self, target: RouteTarget) -> bool {
        target == RouteTarget::Primary || self.secondary(target).is_some()
    }

    fn secondary(&self, target: RouteTarget) -> Option<&Arc<dyn DataSource>> {
        match target {
            RouteTarget::Primary => None,
            RouteTarget::Replica => self.inner.replica.as_ref(),
            RouteTarget::Analytics => self.inner.analytics.as_ref(),
        }
    }

    // ------------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------------

    /// Cached replica health. Never waits on a probe.
    ///
    /// A stale or missing state reports unhealthy and kicks off a background
    /// refresh, so reads go to the primary until a fresh probe says otherwise.
    pub fn replica_healthy(&self) -> bool {
        self.target_healthy(RouteTarget::Replica)
    }

    fn target_healthy(&self, target: RouteTarget) -> bool {
        if self.secondary(target).is_none() {
            return false;
        }
        if !self.inner.config.health_checks_enabled {
            return true;
        }
        match self.inner.health.fresh(target.as_str()) {
            Some(state) => state.healthy,
            None => {
                self.spawn_refresh(target);
                false
            }
        }
    }

    fn spawn_refresh(&self, target: RouteTarget) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let router = self.clone();
        handle.spawn(async move {
            let lock = router.inner.health.probe_lock(target.as_str());
            // Another probe for this target is already running.
            let Ok(_guard) = lock.try_lock() else {
                return;
            };
            if router.inner.health.fresh(target.as_str()).is_some() {
                return;
            }
            let state = router.probe(target).await;
            router.inner.health.store(target.as_str(), state);
        });
    }

    /// Probe the replica now and update the cache.
    ///
    /// Concurrent callers share a single probe: whoever queued behind a
    /// running probe gets its result.
    pub async fn check_replica_health(&self) -> ReplicaHealthState {
        self.check_health(RouteTarget::Replica).await
    }

    /// Probe the analytics source now and update the cache.
    pub async fn check_analytics_health(&self) -> ReplicaHealthState {
        self.check_health(RouteTarget::Analytics).await
    }

    async fn check_health(&self, target: RouteTarget) -> ReplicaHealthState {
        let requested_at = Utc::now();
        let lock = self.inner.health.probe_lock(target.as_str());
        let _guard = lock.lock().await;

        if let Some(state) = self.inner.health.get(target.as_str()) {
            if state.last_checked_at >= requested_at {
                return state;
            }
        }
        let state = self.probe(target).await;
        self.inner.health.store(target.as_str(), state.clone());
        state
    }

    /// Last known state, fresh or not.
    pub fn cached_health(&self, target: RouteTarget) -> Option<ReplicaHealthState> {
        self.inner.health.get(target.as_str())
    }

    /// Record a failure seen on the request path.
    fn mark_unhealthy(&self, target: RouteTarget, reason: &str) {
        let lag = self
            .inner
            .health
            .get(target.as_str())
            .and_then(|s| s.lag_seconds);
        self.inner
            .health
            .store(target.as_str(), ReplicaHealthState::unhealthy(lag, reason));
    }

    async fn probe(&self, target: RouteTarget) -> ReplicaHealthState {
        self.inner.counters.probes.fetch_add(1, Ordering::Relaxed);
        let Some(source) = self.secondary(target) else {
            return ReplicaHealthState::unhealthy(None, format!("{} not configured", target));
        };
        let timeout = self.inner.config.probe_timeout;

        match tokio::time::timeout(timeout, source.probe()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(target = %target, error = %e, "Replica probe failed");
                return ReplicaHealthState::unhealthy(None, e.to_string());
            }
            Err(_) => {
                let err = VistaError::timeout(source.name(), "probe", timeout);
                tracing::warn!(target = %target, error = %err, "Replica probe timed out");
                return ReplicaHealthState::unhealthy(None, err.to_string());
            }
        }

        let lag = match tokio::time::timeout(
            timeout,
            self.inner.primary.replication_lag_seconds(),
        )
        .await
        {
            Ok(Ok(lag)) => lag,
            Ok(Err(e)) => {
                tracing::warn!(target = %target, error = %e, "Replication lag query failed");
                return ReplicaHealthState::unhealthy(None, e.to_string());
            }
            Err(_) => {
                let err = VistaError::timeout(self.inner.primary.name(), "lag query", timeout);
                tracing::warn!(target = %target, error = %err, "Replication lag query timed out");
                return ReplicaHealthState::unhealthy(None, err.to_string());
            }
        };

        let threshold = self.inner.config.replica_lag_threshold_secs;
        if lag > threshold {
            tracing::warn!(
                target = %target,
                lag_seconds = lag,
                threshold_seconds = threshold,
                "Replica lag above threshold"
            );
            ReplicaHealthState::unhealthy(
                Some(lag),
                format!("lag {:.1}s exceeds {:.1}s", lag, threshold),
            )
        } else {
            tracing::debug!(target = %target, lag_seconds = lag, "Replica healthy");
            ReplicaHealthState::healthy(lag)
        }
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Resolve the decision table against the configured sources.
    pub fn route(&self, query_type: QueryType, consistency: Consistency) -> RouteTarget {
        let needs_replica_health = !matches!(
            (query_type, consistency),
            (QueryType::Write | QueryType::Transaction, _)
                | (QueryType::Read, Consistency::Strong | Consistency::Immediate)
                | (QueryType::Analytics | QueryType::Reporting, _)
        );
        let replica_healthy = needs_replica_health && self.replica_healthy();
        if needs_replica_health && !replica_healthy && self.inner.replica.is_some() {
            self.inner.counters.replica_fallbacks.fetch_add(1, Ordering::Relaxed);
            let lag = self
                .inner
                .health
                .get(RouteTarget::Replica.as_str())
                .and_then(|s| s.lag_seconds);
            tracing::warn!(
                target = %RouteTarget::Primary,
                lag_seconds = ?lag,
                query_type = ?query_type,
                "Replica unhealthy, routing read to primary"
            );
        }

        match decide(query_type, consistency, replica_healthy) {
            RouteTarget::Analytics if self.inner.analytics.is_some() => RouteTarget::Analytics,
            RouteTarget::Analytics if self.replica_healthy() => RouteTarget::Replica,
            RouteTarget::Analytics => RouteTarget::Primary,
            other => other,
        }
    }

    /// Execute a query on the routed target.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[Value],
        query_type: QueryType,
        consistency: Consistency,
    ) -> VistaResult<QueryResult> {
        Ok(self
            .execute_routed(sql, params, query_type, consistency)
            .await?
            .result)
    }

    /// Execute a query, reporting where it ran.
    ///
    /// A failure on a secondary target is retried once on the primary; the
    /// primary's own failures are returned as they are.
    pub async fn execute_routed(
        &self,
        sql: &str,
        params: &[Value],
        query_type: QueryType,
        consistency: Consistency,
    ) -> VistaResult<RoutedResult> {
        let target = self.route(query_type, consistency);
        self.count(target);

        let Some(source) = self.secondary(target).cloned() else {
            let result = self.run(&self.inner.primary, sql, params).await?;
            return Ok(RoutedResult {
                target: RouteTarget::Primary,
                fell_back: false,
                result,
            });
        };

        match self.run(&source, sql, params).await {
            Ok(result) => Ok(RoutedResult {
                target,
                fell_back: false,
                result,
            }),
            Err(e) => {
                self.inner.counters.fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target = %target,
                    query_type = ?query_type,
                    error = %e,
                    "Secondary query failed, retrying on primary"
                );
                if target == RouteTarget::Replica {
                    self.mark_unhealthy(target, &e.to_string());
                }
                self.count(RouteTarget::Primary);
                let result = self.run(&self.inner.primary, sql, params).await?;
                Ok(RoutedResult {
                    target: RouteTarget::Primary,
                    fell_back: true,
                    result,
                })
            }
        }
    }

    async fn run(
        &self,
        source: &Arc<dyn DataSource>,
        sql: &str,
        params: &[Value],
    ) -> VistaResult<QueryResult> {
        let timeout = self.inner.config.query_timeout;
        match tokio::time::timeout(timeout, source.query(sql, params)).await {
            Ok(result) => result,
            Err(_) => Err(VistaError::timeout(source.name(), "query", timeout)),
        }
    }

    fn count(&self, target: RouteTarget) {
        let counter = match target {
            RouteTarget::Primary => &self.inner.counters.primary,
            RouteTarget::Replica => &self.inner.counters.replica,
            RouteTarget::Analytics => &self.inner.counters.analytics,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.inner.counters;
        RouterStats {
            primary: c.primary.load(Ordering::Relaxed),
            replica: c.replica.load(Ordering::Relaxed),
            analytics: c.analytics.load(Ordering::Relaxed),
            fallbacks: c.fallbacks.load(Ordering::Relaxed),
            replica_fallbacks: c.replica_fallbacks.load(Ordering::Relaxed),
            probes: c.probes.load(Ordering::Relaxed),
        }
    }

    /// Pool usage for every target. Missing pools are reported, not errors.
    pub fn connection_stats(&self) -> ConnectionStats {
        let report = |source: Option<&Arc<dyn DataSource>>| match source {
            None => PoolReport::NotConfigured,
            Some(source) => match source.pool_stats() {
                Some(stats) => stats.into(),
                None => PoolReport::Error {
                    reason: format!("{} does not expose pool statistics", source.name()),
                },
            },
        };
        let replica_state = self.cached_health(RouteTarget::Replica);

        ConnectionStats {
            primary: report(Some(&self.inner.primary)),
            replica: report(self.inner.replica.as_ref()),
            analytics: report(self.inner.analytics.as_ref()),
            replica_lag_seconds: replica_state.as_ref().and_then(|s| s.lag_seconds),
            replica_healthy: replica_state
                .map(|s| s.healthy && s.is_fresh(self.inner.health.window()))
                .unwrap_or(false),
            timestamp: Utc::now(),
        }
    }
}
