//! Live write-read-delete probe of the cache backend.

use super::store::CacheStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;
use vista_core::{HealthCheck, HealthStatus};

/// Outcome of each probe step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOperations {
    pub write: bool,
    pub read: bool,
    pub delete: bool,
}

/// Result of [`CacheStore::health_check`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHealthReport {
    pub healthy: bool,
    pub operations: ProbeOperations,
    pub response_time_ms: f64,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl CacheHealthReport {
    pub fn to_health_check(&self) -> HealthCheck {
        let check = match (&self.error, self.healthy) {
            (_, true) => HealthCheck::healthy("cache"),
            (Some(error), false) => HealthCheck::unhealthy("cache", error.clone()),
            (None, false) => HealthCheck::unhealthy("cache", "probe value did not round-trip"),
        };
        check
            .with_response_time(self.response_time_ms)
            .with_metadata("write", self.operations.write.into())
            .with_metadata("read", self.operations.read.into())
            .with_metadata("delete", self.operations.delete.into())
    }

    pub fn status(&self) -> HealthStatus {
        if self.healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl CacheStore {
    /// Write, read back and delete a throwaway key, timing the round trip.
    ///
    /// Probe traffic goes straight to the backend so it does not skew the
    /// hit rate. Never fails; problems are reported in the result.
    pub async fn health_check(&self) -> CacheHealthReport {
        let key = format!("health_check:{}", Uuid::now_v7());
        let payload = Utc::now().to_rfc3339().into_bytes();
        let started = Instant::now();
        let mut operations = ProbeOperations {
            write: false,
            read: false,
            delete: false,
        };
        let backend = self.backend();

        let outcome: Result<(), String> = async {
            backend
                .set(&key, payload.clone(), Some(std::time::Duration::from_secs(10)))
                .await
                .map_err(|e| e.to_string())?;
            operations.write = true;

            let read = backend.get(&key).await.map_err(|e| e.to_string())?;
            operations.read = read.as_deref() == Some(payload.as_slice());

            operations.delete = backend.delete(&key).await.map_err(|e| e.to_string())?;
            Ok(())
        }
        .await;

        let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        let error = outcome.err();
        let healthy = error.is_none() && operations.write && operations.read && operations.delete;
        if healthy {
            tracing::debug!(response_time_ms, "Cache health probe passed");
        } else {
            self.metrics().record_error("health_check");
            tracing::error!(
                error = error.as_deref().unwrap_or("value mismatch"),
                write = operations.write,
                read = operations.read,
                delete = operations.delete,
                "Cache health probe failed"
            );
        }

        CacheHealthReport {
            healthy,
            operations,
            response_time_ms,
            error,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryBackend, StoreConfig};
    use crate::metrics::{MetricsCollector, MetricsConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_probe_on_memory_backend() {
        let backend = Arc::new(MemoryBackend::new());
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()).unwrap());
        let store = CacheStore::new(backend.clone(), metrics.clone(), StoreConfig::default());

        let report = store.health_check().await;
        assert!(report.healthy);
        assert!(report.operations.write && report.operations.read && report.operations.delete);
        assert!(backend.is_empty());
        assert_eq!(metrics.total_operations(), 0);
        assert_eq!(report.to_health_check().status, HealthStatus::Healthy);
    }
}
