//! Warming Background Tasks
//!
//! Periodic and event-driven warming runs off the request path. Producers
//! enqueue [`WarmRequest`]s on an mpsc channel; a single worker drains it.
//! The schedule task is one such producer, ticking at the configured
//! interval. A third task keeps the store's key registry from holding on to
//! keys that expired in the backend.
//!
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let (warm_tx, warm_rx) = mpsc::channel(64);
//! let worker = tokio::spawn(warm_worker_task(warmer, warm_rx, shutdown_rx.clone()));
//! let ticker = tokio::spawn(schedule_task(warm_tx.clone(), Duration::from_secs(3600), shutdown_rx));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! ```

use crate::schedule::WarmScope;
use crate::warmer::{EventContext, Warmer};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use vista_core::{CacheTier, EntityRef};
use vista_storage::CacheStore;

/// Work for the warm worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WarmRequest {
    Context {
        entity: EntityRef,
        tier: CacheTier,
        scope: WarmScope,
    },
    Scheduled {
        at: DateTime<Utc>,
    },
    Event {
        name: String,
        context: EventContext,
    },
    Rewarm {
        keys: Vec<String>,
        tier: Option<CacheTier>,
    },
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for the warm worker.
#[derive(Debug, Default)]
pub struct WarmWorkerMetrics {
    /// Requests processed
    pub requests: AtomicU64,
    /// Keys written across all requests
    pub keys_warmed: AtomicU64,
    /// Failures reported by warming runs
    pub failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmWorkerSnapshot {
    pub requests: u64,
    pub keys_warmed: u64,
    pub failures: u64,
}

impl WarmWorkerMetrics {
    pub fn snapshot(&self) -> WarmWorkerSnapshot {
        WarmWorkerSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            keys_warmed: self.keys_warmed.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Counters for the schedule task.
#[derive(Debug, Default)]
pub struct ScheduleMetrics {
    pub enqueued: AtomicU64,
    /// Ticks dropped because the queue was full
    pub dropped: AtomicU64,
}

/// Counters for the registry prune task.
#[derive(Debug, Default)]
pub struct RegistryPruneMetrics {
    pub runs: AtomicU64,
    /// Registry entries dropped because their key was gone
    pub pruned: AtomicU64,
    pub failures: AtomicU64,
}

// ============================================================================
// BACKGROUND TASKS
// ============================================================================

/// Drain warm requests until shutdown or until every sender is gone.
///
/// Returns the metrics collected during the task's lifetime.
pub async fn warm_worker_task(
    warmer: Warmer,
    mut rx: mpsc::Receiver<WarmRequest>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<WarmWorkerMetrics> {
    let metrics = Arc::new(WarmWorkerMetrics::default());
    tracing::info!("Warm worker started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Warm worker shutting down");
                    break;
                }
            }

            request = rx.recv() => {
                let Some(request) = request else {
                    tracing::info!("Warm queue closed");
                    break;
                };
                process(&warmer, request, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        requests = snapshot.requests,
        keys_warmed = snapshot.keys_warmed,
        failures = snapshot.failures,
        "Warm worker completed"
    );
    metrics
}

async fn process(warmer: &Warmer, request: WarmRequest, metrics: &WarmWorkerMetrics) {
    let report = match request {
        WarmRequest::Context { entity, tier, scope } => {
            warmer.warm_context(&entity, tier, &scope).await
        }
        WarmRequest::Scheduled { at } => warmer.warm_scheduled(at).await,
        WarmRequest::Event { name, context } => warmer.warm_for_event(&name, &context).await,
        WarmRequest::Rewarm { keys, tier } => warmer.rewarm_keys(&keys, tier).await,
    };
    metrics.requests.fetch_add(1, Ordering::Relaxed);
    metrics
        .keys_warmed
        .fetch_add(report.warmed as u64, Ordering::Relaxed);
    metrics
        .failures
        .fetch_add(report.failures as u64, Ordering::Relaxed);
}

/// Enqueue a scheduled warming run every `every` until shutdown.
///
/// A full queue drops the tick rather than piling runs up behind a slow
/// worker.
pub async fn schedule_task(
    tx: mpsc::Sender<WarmRequest>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ScheduleMetrics> {
    let metrics = Arc::new(ScheduleMetrics::default());
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "Warm schedule started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Warm schedule shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                match tx.try_send(WarmRequest::Scheduled { at: Utc::now() }) {
                    Ok(()) => {
                        metrics.enqueued.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) => {
                        metrics.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Warm queue full, scheduled run dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        tracing::info!("Warm queue closed, schedule stopping");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!(
        enqueued = metrics.enqueued.load(Ordering::Relaxed),
        dropped = metrics.dropped.load(Ordering::Relaxed),
        "Warm schedule completed"
    );
    metrics
}

/// Prune the store's key registry every `every` until shutdown.
///
/// Returns at once when the backend scans natively and keeps no registry.
pub async fn registry_prune_task(
    store: CacheStore,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RegistryPruneMetrics> {
    let metrics = Arc::new(RegistryPruneMetrics::default());

    if !store.uses_key_registry() {
        tracing::info!("Backend scans natively, registry prune not started");
        return metrics;
    }

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(interval_secs = every.as_secs(), "Registry prune started");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Registry prune shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                match store.prune_registry().await {
                    Ok(pruned) => {
                        metrics.runs.fetch_add(1, Ordering::Relaxed);
                        metrics.pruned.fetch_add(pruned, Ordering::Relaxed);
                    }
                    Err(e) => {
                        metrics.failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "Registry prune failed");
                    }
                }
            }
        }
    }

    tracing::info!(
        runs = metrics.runs.load(Ordering::Relaxed),
        pruned = metrics.pruned.load(Ordering::Relaxed),
        failures = metrics.failures.load(Ordering::Relaxed),
        "Registry prune completed"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recompute::RecomputeRegistry;
    use crate::warmer::{ViewCatalog, WarmingConfig};
    use async_trait::async_trait;
    use serde_json::json;
    use vista_core::{CacheKey, EntityKind, VistaResult};
    use vista_storage::{CacheStore, MemoryBackend, MetricsCollector, MetricsConfig, StoreConfig};

    struct DashboardsOnly;

    #[async_trait]
    impl ViewCatalog for DashboardsOnly {
        async fn views_for(&self, entity: &EntityRef) -> VistaResult<Option<Vec<CacheKey>>> {
            Ok(Some(vec![entity.view_key("dashboard")?]))
        }

        async fn related(&self, _entity: &EntityRef, _kind: EntityKind) -> VistaResult<Vec<EntityRef>> {
            Ok(Vec::new())
        }
    }

    fn warmer() -> (Warmer, CacheStore) {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let store = CacheStore::new(Arc::new(MemoryBackend::new()), metrics, StoreConfig::default());
        let registry = RecomputeRegistry::new()
            .with_fn("restaurant:{id}:dashboard", CacheTier::Hot, |_ctx| async {
                Ok(json!({ "orders": 1 }))
            })
            .unwrap();
        let warmer = Warmer::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(DashboardsOnly),
            WarmingConfig::default(),
        );
        (warmer, store)
    }

    #[tokio::test]
    async fn test_worker_drains_queue_until_closed() {
        let (warmer, store) = warmer();
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        tx.send(WarmRequest::Context {
            entity: EntityRef::new(EntityKind::Restaurant, 7),
            tier: CacheTier::Hot,
            scope: WarmScope::All,
        })
        .await
        .unwrap();
        tx.send(WarmRequest::Event {
            name: "order_placed".into(),
            context: EventContext::restaurant(8),
        })
        .await
        .unwrap();
        drop(tx);

        let snapshot = warm_worker_task(warmer, rx, shutdown_rx).await.snapshot();
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.keys_warmed, 2);
        assert!(store.exists("restaurant:8:dashboard").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_enqueues_and_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(schedule_task(tx, Duration::from_secs(60), shutdown_rx));

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        assert_eq!(metrics.enqueued.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.dropped.load(Ordering::Relaxed), 2);
        assert!(matches!(rx.recv().await, Some(WarmRequest::Scheduled { .. })));
    }

    #[tokio::test]
    async fn test_registry_prune_drops_expired_keys() {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let store = CacheStore::new(
            Arc::new(MemoryBackend::new().with_pattern_scan(false)),
            metrics,
            StoreConfig::default(),
        );
        store.set("restaurant:7:dashboard", b"{}".to_vec(), None).await.unwrap();
        store
            .set("order:1:summary", b"{}".to_vec(), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(registry_prune_task(
            store.clone(),
            Duration::from_secs(60),
            shutdown_rx,
        ));
        while store.stats().await.tracked_keys > 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown_tx.send(true).unwrap();
        let metrics = handle.await.unwrap();

        assert_eq!(metrics.runs.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.pruned.load(Ordering::Relaxed), 1);
        assert!(store.exists("restaurant:7:dashboard").await.unwrap());
    }

    #[tokio::test]
    async fn test_registry_prune_skips_scanning_backends() {
        let (_, store) = warmer();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let metrics = registry_prune_task(store, Duration::from_secs(1), shutdown_rx).await;
        assert_eq!(metrics.runs.load(Ordering::Relaxed), 0);
    }
}
