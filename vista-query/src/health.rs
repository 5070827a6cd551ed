//! Cached health of secondary data sources.
//!
//! One state per target name, each stamped with when it was checked. A
//! state older than the cache window is stale and counts as unhealthy until
//! a fresh probe lands. Probes for the same target are single-flight: one
//! async mutex per target, with waiters reusing the result of the probe
//! they queued behind.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use vista_core::{HealthCheck, HealthStatus};

/// Outcome of probing one secondary source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaHealthState {
    pub healthy: bool,
    /// Replication lag at check time, when it could be measured
    pub lag_seconds: Option<f64>,
    pub last_checked_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl ReplicaHealthState {
    pub fn healthy(lag_seconds: f64) -> Self {
        Self {
            healthy: true,
            lag_seconds: Some(lag_seconds),
            last_checked_at: Utc::now(),
            error: None,
        }
    }

    pub fn unhealthy(lag_seconds: Option<f64>, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            lag_seconds,
            last_checked_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.last_checked_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() <= window
    }

    pub fn to_health_check(&self, component: &str) -> HealthCheck {
        let check = match &self.error {
            None => HealthCheck::healthy(component),
            Some(error) => HealthCheck::unhealthy(component, error.clone()),
        };
        let check = match self.lag_seconds {
            Some(lag) => check.with_metadata("lag_seconds", serde_json::json!(lag)),
            None => check,
        };
        check.with_metadata(
            "last_checked_at",
            serde_json::json!(self.last_checked_at.to_rfc3339()),
        )
    }

    pub fn status(&self) -> HealthStatus {
        if self.healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

#[derive(Debug)]
pub(crate) struct HealthCache {
    window: Duration,
    states: RwLock<HashMap<String, ReplicaHealthState>>,
    probe_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HealthCache {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            states: RwLock::new(HashMap::new()),
            probe_locks: DashMap::new(),
        }
    }

    pub(crate) fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn get(&self, target: &str) -> Option<ReplicaHealthState> {
        self.states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
    }

    /// The cached state, only while inside the window.
    pub(crate) fn fresh(&self, target: &str) -> Option<ReplicaHealthState> {
        self.get(target).filter(|s| s.is_fresh(self.window))
    }

    pub(crate) fn store(&self, target: &str, state: ReplicaHealthState) {
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(target.to_string(), state);
    }

    pub(crate) fn probe_lock(&self, target: &str) -> Arc<Mutex<()>> {
        self.probe_locks
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_state_is_not_fresh() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let mut state = ReplicaHealthState::healthy(0.4);
        cache.store("replica", state.clone());
        assert!(cache.fresh("replica").is_some());

        state.last_checked_at = Utc::now() - chrono::Duration::seconds(31);
        cache.store("replica", state);
        assert!(cache.fresh("replica").is_none());
        assert!(cache.get("replica").is_some());
    }

    #[test]
    fn test_probe_lock_is_shared_per_target() {
        let cache = HealthCache::new(Duration::from_secs(30));
        let a = cache.probe_lock("replica");
        let b = cache.probe_lock("replica");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &cache.probe_lock("analytics")));
    }

    #[test]
    fn test_health_check_conversion() {
        let check = ReplicaHealthState::unhealthy(Some(10.0), "lag 10.0s exceeds 5.0s")
            .to_health_check("replica");
        assert_eq!(check.status, HealthStatus::Unhealthy);
        assert_eq!(check.metadata.unwrap()["lag_seconds"], serde_json::json!(10.0));
    }
}
