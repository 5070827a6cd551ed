//! Cache store layer.
//!
//! - [`CacheBackend`]: raw key/value backend trait
//! - [`MemoryBackend`] and, with the `redis` feature, `RedisBackend`
//! - [`CacheStore`]: the adapter every other component talks to
//! - [`CacheEntry`]: tiered envelope around stored values

mod entry;
mod health;
mod memory;
mod registry;
mod store;
mod traits;

#[cfg(feature = "redis")]
mod redis_backend;

pub use entry::CacheEntry;
pub use health::{CacheHealthReport, ProbeOperations};
pub use memory::MemoryBackend;
pub use registry::KeyRegistry;
pub use store::{CacheStats, CacheStore, StoreConfig};
pub use traits::{CacheBackend, MemoryStats};

#[cfg(feature = "redis")]
pub use redis_backend::{RedisBackend, RedisConfig};
