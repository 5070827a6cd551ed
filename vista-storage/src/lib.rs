//! Vista Storage - cache store adapter and metrics
//!
//! The only crate that talks to the cache backend. Everything above it goes
//! through [`CacheStore`], which applies timeouts, records metrics and
//! provides pattern operations whether or not the backend can scan.

pub mod cache;
pub mod metrics;

pub use cache::{
    CacheBackend, CacheEntry, CacheHealthReport, CacheStats, CacheStore, KeyRegistry,
    MemoryBackend, MemoryStats, StoreConfig,
};
pub use metrics::{ExportFormat, MetricsCollector, MetricsConfig, MetricsSnapshot, TimeWindow};

#[cfg(feature = "redis")]
pub use cache::{RedisBackend, RedisConfig};
