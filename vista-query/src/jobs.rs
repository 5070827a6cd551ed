//! Replica Health Monitor Background Task
//!
//! Keeps the router's health cache warm so request paths rarely see a stale
//! state. Each tick probes every configured secondary target through the
//! router's single-flight check.
//!
//! ```ignore
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let handle = tokio::spawn(health_monitor_task(router.clone(), Duration::from_secs(15), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = handle.await?;
//! ```

use crate::router::QueryRouter;
use crate::source::RouteTarget;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the health monitor.
#[derive(Debug, Default)]
pub struct HealthMonitorMetrics {
    /// Probe cycles completed
    pub cycles: AtomicU64,
    /// Probes that found the target healthy
    pub healthy_probes: AtomicU64,
    /// Probes that found the target unhealthy
    pub unhealthy_probes: AtomicU64,
}

impl HealthMonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HealthMonitorSnapshot {
        HealthMonitorSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            healthy_probes: self.healthy_probes.load(Ordering::Relaxed),
            unhealthy_probes: self.unhealthy_probes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthMonitorSnapshot {
    pub cycles: u64,
    pub healthy_probes: u64,
    pub unhealthy_probes: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Periodically refresh replica and analytics health until shutdown.
///
/// Returns the metrics collected during the task's lifetime.
pub async fn health_monitor_task(
    router: QueryRouter,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<HealthMonitorMetrics> {
    let metrics = Arc::new(HealthMonitorMetrics::new());

    if !router.config().health_checks_enabled {
        tracing::info!("Health checks disabled, replica health monitor not started");
        return metrics;
    }

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "Replica health monitor started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Replica health monitor shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                monitor_cycle(&router, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        cycles = snapshot.cycles,
        healthy_probes = snapshot.healthy_probes,
        unhealthy_probes = snapshot.unhealthy_probes,
        "Replica health monitor completed"
    );
    metrics
}

async fn monitor_cycle(router: &QueryRouter, metrics: &HealthMonitorMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);

    for target in [RouteTarget::Replica, RouteTarget::Analytics] {
        if !router.is_configured(target) {
            continue;
        }
        let state = match target {
            RouteTarget::Analytics => router.check_analytics_health().await,
            _ => router.check_replica_health().await,
        };
        if state.healthy {
            metrics.healthy_probes.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(target = %target, lag_seconds = ?state.lag_seconds, "Health probe ok");
        } else {
            metrics.unhealthy_probes.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RouterConfig;
    use crate::source::{DataSource, QueryResult};
    use async_trait::async_trait;
    use serde_json::Value;
    use vista_core::VistaResult;

    struct Quiet;

    #[async_trait]
    impl DataSource for Quiet {
        fn name(&self) -> &str {
            "quiet"
        }
        async fn query(&self, _sql: &str, _params: &[Value]) -> VistaResult<QueryResult> {
            Ok(QueryResult::default())
        }
        async fn probe(&self) -> VistaResult<()> {
            Ok(())
        }
        async fn replication_lag_seconds(&self) -> VistaResult<f64> {
            Ok(0.5)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_probes_until_shutdown() {
        let router = QueryRouter::with_sources(
            Arc::new(Quiet),
            Some(Arc::new(Quiet)),
            None,
            RouterConfig::default(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(health_monitor_task(
            router.clone(),
            Duration::from_secs(10),
            shutdown_rx,
        ));

        tokio::time::sleep(Duration::from_secs(25)).await;
        shutdown_tx.send(true).unwrap();
        let snapshot = handle.await.unwrap().snapshot();

        assert_eq!(snapshot.cycles, 3);
        assert_eq!(snapshot.healthy_probes, 3);
        assert_eq!(snapshot.unhealthy_probes, 0);
        assert!(router.replica_healthy());
    }
}
