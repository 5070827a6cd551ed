//! Raw cache backend trait.
//!
//! Backends only need key/value get-set-delete. Pipelined multi-key calls
//! have looping default implementations; native pattern scans and memory
//! statistics are optional capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use vista_core::{VistaError, VistaResult};

/// Cache backend trait for pluggable key/value stores.
///
/// Implementations must be safe to share across tasks. Values are opaque
/// bytes; the [`CacheStore`](super::CacheStore) adapter owns serialization.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in logs and errors.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> VistaResult<Option<Vec<u8>>>;

    /// Write a value. `None` means no expiry.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> VistaResult<()>;

    /// Remove a key, reporting whether it existed.
    async fn delete(&self, key: &str) -> VistaResult<bool>;

    async fn exists(&self, key: &str) -> VistaResult<bool>;

    async fn get_many(&self, keys: &[String]) -> VistaResult<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set_many(
        &self,
        entries: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> VistaResult<()> {
        for (key, value) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }

    /// Remove several keys, returning how many existed.
    async fn delete_many(&self, keys: &[String]) -> VistaResult<u64> {
        let mut removed = 0;
        for key in keys {
            if self.delete(key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Whether [`CacheBackend::scan`] is implemented natively.
    fn supports_pattern_scan(&self) -> bool {
        false
    }

    /// Keys matching a backend glob. Only called when
    /// [`CacheBackend::supports_pattern_scan`] is true.
    async fn scan(&self, glob: &str) -> VistaResult<Vec<String>> {
        Err(VistaError::backend(
            self.name(),
            format!("pattern scan not supported (glob {})", glob),
        ))
    }

    async fn memory_stats(&self) -> VistaResult<Option<MemoryStats>> {
        Ok(None)
    }
}

/// Backend memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub used_bytes: u64,
    pub peak_bytes: u64,
    /// Resident over used; above 1.0 means fragmented.
    pub fragmentation_ratio: f64,
}
