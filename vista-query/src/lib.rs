//! Vista Query - replica-aware routing and the L2 query result cache
//!
//! - [`QueryRouter`]: sends each query to the primary, a replica or an
//!   analytics source depending on its type, consistency need and the
//!   cached replica health
//! - [`L2QueryCache`]: raw query results cached by normalized fingerprint
//! - [`health_monitor_task`]: background refresh of replica health
//!
//! With the `postgres` feature, [`PostgresSource`] provides a pooled
//! deadpool-postgres implementation of [`DataSource`].

pub mod health;
pub mod jobs;
pub mod l2;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod router;
pub mod source;

pub use health::ReplicaHealthState;
pub use jobs::{health_monitor_task, HealthMonitorMetrics, HealthMonitorSnapshot};
pub use l2::{L2CacheStats, L2QueryCache, QueryCacheType};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresSource};
pub use router::{
    decide, ConnectionStats, PoolReport, QueryRouter, RoutedResult, RouterConfig, RouterStats,
};
pub use source::{Consistency, DataSource, PoolStats, QueryResult, QueryType, RouteTarget};
