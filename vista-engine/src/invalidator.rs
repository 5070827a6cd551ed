//! Dependency Graph Invalidator
//!
//! Decides which cached views die when something changes and removes them.
//! Traversal is breadth-first over concrete keys. Wildcard dependents are
//! expanded through the store, and every key and every pattern is visited at
//! most once, so cycles and diamonds in the graph terminate and each key is
//! deleted exactly once.

use crate::graph::DependencyGraph;
use crate::policy;
use crate::recompute::RecomputeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use vista_core::{namespace_of, EntityChange, KeyPattern, VistaError, VistaResult};
use vista_storage::{CacheEntry, CacheStore};

/// Regeneration estimate for keys with no recorded history, in milliseconds.
pub const DEFAULT_REGENERATION_MS: f64 = 100.0;

// ============================================================================
// REQUESTS AND REPORTS
// ============================================================================

/// How a root and its dependents are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Delete the root and everything reachable from it
    #[default]
    Cascade,
    /// Delete the root and its direct dependents
    Selective,
    /// Recompute the root in place
    Update,
}

/// A unit of invalidation work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InvalidationRequest {
    Cascade { root: String },
    Selective { root: String },
    Update { root: String },
    Batch {
        roots: Vec<String>,
        /// Strategy applied to every root
        #[serde(default)]
        mode: InvalidationStrategy,
    },
}

impl InvalidationRequest {
    pub fn cascade(root: impl Into<String>) -> Self {
        Self::Cascade { root: root.into() }
    }

    pub fn selective(root: impl Into<String>) -> Self {
        Self::Selective { root: root.into() }
    }

    pub fn update(root: impl Into<String>) -> Self {
        Self::Update { root: root.into() }
    }

    /// Batch of cascades.
    pub fn batch<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Batch {
            roots: roots.into_iter().map(Into::into).collect(),
            mode: InvalidationStrategy::Cascade,
        }
    }

    /// Change the strategy of a batch. No effect on single requests.
    pub fn with_strategy(self, mode: InvalidationStrategy) -> Self {
        match self {
            Self::Batch { roots, .. } => Self::Batch { roots, mode },
            other => other,
        }
    }
}

/// What an invalidation did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationReport {
    /// Keys removed, in traversal order
    pub deleted: Vec<String>,
    /// Keys recomputed in place
    pub updated: Vec<String>,
    /// Wildcard patterns expanded against the store
    pub patterns_expanded: usize,
}

impl InvalidationReport {
    pub fn merge(&mut self, other: InvalidationReport) {
        self.deleted.extend(other.deleted);
        self.updated.extend(other.updated);
        self.patterns_expanded += other.patterns_expanded;
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.updated.is_empty()
    }
}

/// A key and the keys that depend on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub key: String,
    pub dependents: Vec<DependencyNode>,
}

impl DependencyNode {
    /// Every key below this node, breadth-first.
    pub fn descendants(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut queue: VecDeque<&DependencyNode> = self.dependents.iter().collect();
        while let Some(node) = queue.pop_front() {
            out.push(node.key.as_str());
            queue.extend(node.dependents.iter());
        }
        out
    }
}

/// Cost estimate of invalidating a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub primary_key: String,
    pub direct_dependents: usize,
    pub total_dependents: usize,
    pub estimated_regeneration_time_ms: f64,
    /// Stored bytes of every dependent
    pub estimated_memory_freed: u64,
}

#[derive(Default)]
struct Visited {
    keys: HashSet<String>,
    patterns: HashSet<String>,
}

// ============================================================================
// INVALIDATOR
// ============================================================================

#[derive(Clone)]
pub struct Invalidator {
    graph: Arc<DependencyGraph>,
    store: CacheStore,
    recomputes: Arc<RecomputeRegistry>,
}

impl std::fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invalidator")
            .field("rules", &self.graph.len())
            .field("recomputes", &self.recomputes.len())
            .finish()
    }
}

fn merge_values(existing: Value, fresh: Value) -> Value {
    match (existing, fresh) {
        (Value::Object(mut current), Value::Object(update)) => {
            current.extend(update);
            Value::Object(current)
        }
        (_, fresh) => fresh,
    }
}

impl Invalidator {
    pub fn new(
        graph: Arc<DependencyGraph>,
        store: CacheStore,
        recomputes: Arc<RecomputeRegistry>,
    ) -> Self {
        Self {
            graph,
            store,
            recomputes,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Execute one request.
    ///
    /// Backend failures while deleting are returned, never swallowed; keys
    /// removed before the failure stay removed.
    pub async fn invalidate(&self, request: InvalidationRequest) -> VistaResult<InvalidationReport> {
        let mut visited = Visited::default();
        let mut report = InvalidationReport::default();
        self.execute(&request, &mut visited, &mut report).await?;

        tracing::info!(
            request = ?request,
            deleted = report.deleted.len(),
            updated = report.updated.len(),
            patterns_expanded = report.patterns_expanded,
            "Invalidation completed"
        );
        Ok(report)
    }

    /// Map a domain write through the entity policy and execute the result.
    ///
    /// All requests of one change share a visited set: a key patched by an
    /// Update is not deleted again by a later request.
    pub async fn invalidate_for_entity_change(
        &self,
        change: &EntityChange,
    ) -> VistaResult<InvalidationReport> {
        let mut visited = Visited::default();
        let mut report = InvalidationReport::default();
        for request in policy::requests_for(change)? {
            self.execute(&request, &mut visited, &mut report).await?;
        }
        tracing::info!(
            entity = %change.entity,
            operation = ?change.operation,
            deleted = report.deleted.len(),
            updated = report.updated.len(),
            "Entity change invalidated"
        );
        Ok(report)
    }

    async fn execute(
        &self,
        request: &InvalidationRequest,
        visited: &mut Visited,
        report: &mut InvalidationReport,
    ) -> VistaResult<()> {
        match request {
            InvalidationRequest::Cascade { root } => self.cascade(root, visited, report).await,
            InvalidationRequest::Selective { root } => self.selective(root, visited, report).await,
            InvalidationRequest::Update { root } => self.update(root, visited, report).await,
            InvalidationRequest::Batch { roots, mode } => {
                for root in roots {
                    match mode {
                        InvalidationStrategy::Cascade => self.cascade(root, visited, report).await?,
                        InvalidationStrategy::Selective => {
                            self.selective(root, visited, report).await?
                        }
                        InvalidationStrategy::Update => self.update(root, visited, report).await?,
                    }
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------------------

    /// Keys a pattern denotes, expanding each wildcard pattern once.
    async fn expand(
        &self,
        pattern: &KeyPattern,
        visited: &mut Visited,
        report: &mut InvalidationReport,
    ) -> VistaResult<Vec<String>> {
        if pattern.is_concrete() {
            return Ok(vec![pattern.as_str().to_string()]);
        }
        if !visited.patterns.insert(pattern.as_str().to_string()) {
            return Ok(Vec::new());
        }
        report.patterns_expanded += 1;
        let keys = self.store.keys_matching(pattern).await?;
        tracing::trace!(pattern = %pattern, matched = keys.len(), "Pattern expanded");
        Ok(keys)
    }

    async fn roots(
        &self,
        root: &str,
        visited: &mut Visited,
        report: &mut InvalidationReport,
    ) -> VistaResult<Vec<String>> {
        let pattern = KeyPattern::parse(root)?;
        self.expand(&pattern, visited, report).await
    }

    async fn delete(&self, key: &str, report: &mut InvalidationReport) -> VistaResult<()> {
        if self.store.delete(key).await? {
            tracing::trace!(key = %key, "Invalidated");
            report.deleted.push(key.to_string());
        }
        Ok(())
    }

    async fn cascade(
        &self,
        root: &str,
        visited: &mut Visited,
        report: &mut InvalidationReport,
    ) -> VistaResult<()> {
        let mut queue = VecDeque::new();
        for key in self.roots(root, visited, report).await? {
            if visited.keys.insert(key.clone()) {
                queue.push_back(key);
            }
        }

        while let Some(key) = queue.pop_front() {
            self.delete(&key, report).await?;
            for pattern in self.graph.dependents_of(&key)? {
                for dependent in self.expand(&pattern, visited, report).await? {
                    if visited.keys.insert(dependent.clone()) {
                        queue.push_back(dependent);
                    }
                }
            }
        }
        Ok(())
    }

    async fn selective(
        &self,
        root: &str,
        visited: &mut Visited,
        report: &mut InvalidationReport,
    ) -> VistaResult<()> {
        for key in self.roots(root, visited, report).await? {
            if !visited.keys.insert(key.clone()) {
                continue;
            }
            self.delete(&key, report).await?;
            for pattern in self.graph.dependents_of(&key)? {
                for dependent in self.expand(&pattern, visited, report).await? {
                    if visited.keys.insert(dependent.clone()) {
                        self.delete(&dependent, report).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn update(
        &self,
        root: &str,
        visited: &mut Visited,
        report: &mut InvalidationReport,
    ) -> VistaResult<()> {
        for key in self.roots(root, visited, report).await? {
            if visited.keys.insert(key.clone()) {
                self.update_key(&key, report).await?;
            }
        }
        Ok(())
    }

    /// Recompute and merge one key in place.
    ///
    /// Read-modify-write without a version check: a concurrent writer between
    /// the read and the write is overwritten. Without a callback, or when the
    /// callback fails, the key is deleted instead so a stale value is never
    /// left behind.
    async fn update_key(&self, key: &str, report: &mut InvalidationReport) -> VistaResult<()> {
        let (fresh, tier) = match self.recomputes.recompute(key, self.store.metrics()).await {
            None => {
                tracing::info!(key = %key, "No recompute callback, deleting instead of updating");
                return self.delete(key, report).await;
            }
            Some(Err(e)) => {
                tracing::error!(key = %key, error = %e, "Recompute failed, deleting instead of updating");
                return self.delete(key, report).await;
            }
            Some(Ok(computed)) => computed,
        };

        let merged = match self.store.peek_entry::<Value>(key).await {
            Ok(Some(existing)) => merge_values(existing.value, fresh),
            Ok(None) => fresh,
            Err(e @ VistaError::SerializationFailure { .. }) => {
                tracing::warn!(key = %key, error = %e, "Replacing unreadable entry");
                fresh
            }
            Err(e) => return Err(e),
        };

        self.store
            .put_entry(key, &CacheEntry::new(merged, tier))
            .await?;
        tracing::debug!(key = %key, tier = %tier, "Updated in place");
        report.updated.push(key.to_string());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Tree of live keys that depend on `key`. A key reachable along several
    /// paths appears once, under the first parent that reached it.
    pub async fn dependency_tree(&self, key: &str) -> VistaResult<DependencyNode> {
        let mut placed: HashSet<String> = HashSet::from([key.to_string()]);
        let mut expanded: HashSet<String> = HashSet::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut queue = VecDeque::from([key.to_string()]);

        while let Some(current) = queue.pop_front() {
            let mut kids = Vec::new();
            for pattern in self.graph.dependents_of(&current)? {
                if !expanded.insert(pattern.as_str().to_string()) {
                    continue;
                }
                for dependent in self.store.keys_matching(&pattern).await? {
                    if placed.insert(dependent.clone()) {
                        kids.push(dependent.clone());
                        queue.push_back(dependent);
                    }
                }
            }
            children.insert(current, kids);
        }

        Ok(build_node(key, &mut children))
    }

    /// Estimate what invalidating `key` would cost.
    pub async fn analyze_invalidation_impact(&self, key: &str) -> VistaResult<ImpactAnalysis> {
        let tree = self.dependency_tree(key).await?;
        let dependents = tree.descendants();
        let metrics = self.store.metrics();

        let mut regeneration_ms = 0.0;
        let mut memory = 0u64;
        for dependent in &dependents {
            regeneration_ms += metrics
                .average_regeneration_ms(dependent)
                .or_else(|| metrics.namespace_regeneration_ms(namespace_of(dependent)))
                .unwrap_or(DEFAULT_REGENERATION_MS);
            memory += self.store.entry_size(dependent).await?.unwrap_or(0);
        }

        Ok(ImpactAnalysis {
            primary_key: key.to_string(),
            direct_dependents: tree.dependents.len(),
            total_dependents: dependents.len(),
            estimated_regeneration_time_ms: (regeneration_ms * 100.0).round() / 100.0,
            estimated_memory_freed: memory,
        })
    }
}

fn build_node(key: &str, children: &mut HashMap<String, Vec<String>>) -> DependencyNode {
    let kids = children.remove(key).unwrap_or_default();
    DependencyNode {
        key: key.to_string(),
        dependents: kids.iter().map(|k| build_node(k, children)).collect(),
    }
}
