//! Vista Engine - invalidation, warming and the service facade
//!
//! - [`DependencyGraph`]: immutable rules saying which views derive from
//!   which entities
//! - [`Invalidator`]: cascade, selective and in-place update invalidation
//!   driven by the graph
//! - [`Warmer`]: context, schedule, event and post-invalidation warming
//! - [`CacheService`]: the surface a host application integrates with

pub mod graph;
pub mod invalidator;
pub mod jobs;
pub mod policy;
pub mod recompute;
pub mod schedule;
pub mod service;
pub mod warmer;

pub use graph::{DependencyGraph, DependencyGraphBuilder, DependencyRule, RuleSummary};
pub use invalidator::{
    DependencyNode, ImpactAnalysis, InvalidationReport, InvalidationRequest, InvalidationStrategy,
    Invalidator,
};
pub use jobs::{
    registry_prune_task, schedule_task, warm_worker_task, RegistryPruneMetrics, ScheduleMetrics,
    WarmRequest, WarmWorkerMetrics,
};
pub use recompute::{FnRecompute, Recompute, RecomputeContext, RecomputeRegistry};
pub use schedule::{PlanStep, TimeBucket, WarmScope};
pub use service::{
    CacheService, CacheServiceBuilder, ChangeOutcome, JobMetrics, ServiceJobs, VistaConfig,
};
pub use warmer::{
    view_priority, EventContext, PopulationSource, ViewCatalog, WarmReport, Warmer, WarmerMetrics,
    WarmingConfig,
};
