//! Vista Core - shared types for the caching and read-routing layer
//!
//! Everything here is synchronous and backend-agnostic:
//! - [`CacheKey`] and [`KeyPattern`]: the key fabric every component agrees on
//! - [`fingerprint`]: normalized-SQL fingerprints for the L2 result cache
//! - [`CacheTier`]: Hot/Warm/Cold/Archive freshness tiers
//! - [`EntityKind`] / [`EntityChange`]: domain writes that drive invalidation
//! - [`VistaError`]: the error taxonomy shared across crates

pub mod config;
pub mod entity;
pub mod error;
pub mod fingerprint;
pub mod health;
pub mod key;
pub mod pattern;
pub mod tier;

pub use entity::{EntityChange, EntityKind, EntityOperation, EntityRef};
pub use error::{ConfigError, VistaError, VistaResult};
pub use fingerprint::{fingerprint, normalize_sql, QueryFingerprint, L2_NAMESPACE};
pub use health::{HealthCheck, HealthStatus};
pub use key::{namespace_of, CacheKey, CacheKeyBuilder, MAX_KEY_LENGTH};
pub use pattern::{Captures, KeyPattern};
pub use tier::CacheTier;
