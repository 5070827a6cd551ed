//! Property-Based Tests for Dependency Graph Invalidation
//!
//! Property: for any dependency graph over a fixed node set (cycles and
//! diamonds included), a Cascade from any root deletes exactly the nodes
//! reachable from it, each exactly once, and terminates.

use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use vista_engine::{DependencyGraph, InvalidationRequest, Invalidator, RecomputeRegistry};
use vista_storage::CacheEntry;
use vista_test_utils::{assertions, fixtures, memory_store, CacheTier, EntityChange, EntityKind};

const NODES: usize = 8;

fn arb_edges() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..NODES, 0..NODES), 0..20)
}

fn node(i: usize) -> String {
    format!("node{}", i)
}

fn graph_from(edges: &[(usize, usize)]) -> DependencyGraph {
    let mut builder = DependencyGraph::builder();
    for from in 0..NODES {
        let dependents: Vec<String> = edges
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|(_, to)| node(*to))
            .collect();
        if !dependents.is_empty() {
            builder = builder.rule(&node(from), &dependents);
        }
    }
    builder.build().unwrap()
}

fn reachable(edges: &[(usize, usize)], root: usize) -> BTreeSet<String> {
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(current) = queue.pop_front() {
        for (_, to) in edges.iter().filter(|(f, _)| *f == current) {
            if seen.insert(*to) {
                queue.push_back(*to);
            }
        }
    }
    seen.into_iter().map(node).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_cascade_deletes_reachable_closure_once(
        edges in arb_edges(),
        root in 0..NODES,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        rt.block_on(async {
            let store = memory_store();
            for i in 0..NODES {
                store.put_value(&node(i), i, CacheTier::Warm).await.unwrap();
            }
            let invalidator = Invalidator::new(
                Arc::new(graph_from(&edges)),
                store.clone(),
                Arc::new(RecomputeRegistry::new()),
            );

            let report = invalidator
                .invalidate(InvalidationRequest::cascade(node(root)))
                .await
                .unwrap();

            assertions::assert_deleted_once(&report);
            let deleted: BTreeSet<String> = report.deleted.iter().cloned().collect();
            let expected = reachable(&edges, root);
            assert_eq!(deleted, expected);
            assert_eq!(report.deleted.first(), Some(&node(root)));

            for i in 0..NODES {
                let key = node(i);
                assert_eq!(store.exists(&key).await.unwrap(), !expected.contains(&key));
            }
        });
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

fn invalidator(store: &vista_storage::CacheStore, registry: RecomputeRegistry) -> Invalidator {
    Invalidator::new(
        Arc::new(fixtures::restaurant_graph().unwrap()),
        store.clone(),
        Arc::new(registry),
    )
}

#[tokio::test]
async fn test_restaurant_rename_cascades_to_owned_views_only() {
    let store = memory_store();
    fixtures::seed_restaurants(&store).await.unwrap();

    let change = EntityChange::updated(EntityKind::Restaurant, 7).with_fields(["name"]);
    let report = invalidator(&store, RecomputeRegistry::new())
        .invalidate_for_entity_change(&change)
        .await
        .unwrap();

    assertions::assert_deleted_once(&report);
    assertions::assert_gone(
        &store,
        &[
            "restaurant:7:dashboard",
            "restaurant:7:orders",
            "menu:12:full:restaurant=7",
            "menuitem:40:details:menu=12",
            "employee:3:summary:restaurant=7",
            "order:99:summary:restaurant=7",
        ],
    )
    .await;
    assertions::assert_live(
        &store,
        &["restaurant:8:dashboard", "menu:13:full:restaurant=8"],
    )
    .await;
}

#[tokio::test]
async fn test_update_strategy_keeps_unrelated_fields() {
    let store = memory_store();
    fixtures::seed_restaurants(&store).await.unwrap();
    let registry = RecomputeRegistry::new()
        .with_fn("restaurant:{id}:dashboard", CacheTier::Hot, |_ctx| async {
            Ok(json!({ "name": "New Name" }))
        })
        .unwrap();

    let report = invalidator(&store, registry)
        .invalidate(InvalidationRequest::update("restaurant:7:dashboard"))
        .await
        .unwrap();
    assert_eq!(report.updated, vec!["restaurant:7:dashboard"]);

    let entry: CacheEntry<Value> = store
        .peek_entry("restaurant:7:dashboard")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.value["name"], "New Name");
    assert_eq!(entry.value["covers"], 40);
    assert_eq!(entry.value["key"], "restaurant:7:dashboard");
}

#[tokio::test]
async fn test_impact_sums_dependent_regeneration_times() {
    let store = memory_store();
    for key in [
        "restaurant:7:dashboard",
        "menu:12:full:restaurant=7",
        "employee:3:summary:restaurant=7",
    ] {
        store.put_value(key, json!({ "key": key }), CacheTier::Warm).await.unwrap();
    }
    let metrics = store.metrics();
    metrics.record_regeneration("menu:12:full:restaurant=7", Duration::from_millis(1000));
    metrics.record_regeneration("employee:3:summary:restaurant=7", Duration::from_millis(500));

    let graph = DependencyGraph::builder()
        .rule(
            "restaurant:{id}:dashboard",
            &["menu:*:full:restaurant={id}", "employee:*:summary:restaurant={id}"],
        )
        .build()
        .unwrap();
    let impact = Invalidator::new(Arc::new(graph), store.clone(), Arc::new(RecomputeRegistry::new()))
        .analyze_invalidation_impact("restaurant:7:dashboard")
        .await
        .unwrap();

    assert_eq!(impact.total_dependents, 2);
    assert_eq!(impact.direct_dependents, 2);
    assert_eq!(impact.estimated_regeneration_time_ms, 1500.0);
    assert!(impact.estimated_memory_freed > 0);
}

#[tokio::test]
async fn test_order_status_change_touches_only_order_views() {
    let store = memory_store();
    fixtures::seed_restaurants(&store).await.unwrap();
    let registry = RecomputeRegistry::new()
        .with_fn("restaurant:{id}:dashboard", CacheTier::Hot, |_ctx| async {
            Ok(json!({ "orders_today": 13 }))
        })
        .unwrap();

    let change = EntityChange::updated(EntityKind::Order, 99)
        .with_fields(["status"])
        .owned_by(7);
    let report = invalidator(&store, registry)
        .invalidate_for_entity_change(&change)
        .await
        .unwrap();

    assert_eq!(report.deleted, vec!["restaurant:7:orders"]);
    assert_eq!(report.updated, vec!["restaurant:7:dashboard"]);
    assertions::assert_live(
        &store,
        &[
            "menu:12:full:restaurant=7",
            "menuitem:40:details:menu=12",
            "employee:3:summary:restaurant=7",
            "order:99:summary:restaurant=7",
        ],
    )
    .await;

    let dashboard: CacheEntry<Value> = store
        .peek_entry("restaurant:7:dashboard")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dashboard.value["orders_today"], 13);
    assert_eq!(dashboard.value["covers"], 40);
}

#[tokio::test]
async fn test_orders_view_alone_sweeps_dashboard() {
    let store = memory_store();
    fixtures::seed_restaurants(&store).await.unwrap();

    let report = invalidator(&store, RecomputeRegistry::new())
        .invalidate(InvalidationRequest::selective("restaurant:7:orders"))
        .await
        .unwrap();
    assert_eq!(report.deleted, vec!["restaurant:7:orders", "restaurant:7:dashboard"]);
    assertions::assert_live(&store, &["menu:12:full:restaurant=7"]).await;
}

#[tokio::test]
async fn test_backend_outage_is_surfaced() {
    let backend = Arc::new(vista_test_utils::RecordingBackend::new());
    let store = vista_test_utils::store_with(backend.clone());
    fixtures::seed_restaurants(&store).await.unwrap();
    backend.set_unavailable(true);

    let result = invalidator(&store, RecomputeRegistry::new())
        .invalidate(InvalidationRequest::cascade("restaurant:7"))
        .await;
    assertions::assert_backend_unavailable(&result);
}

#[tokio::test]
async fn test_registry_path_matches_scan_path() {
    let backend = Arc::new(vista_test_utils::RecordingBackend::without_pattern_scan());
    let store = vista_test_utils::store_with(backend.clone());
    fixtures::seed_restaurants(&store).await.unwrap();

    let report = invalidator(&store, RecomputeRegistry::new())
        .invalidate(InvalidationRequest::cascade("menu:12"))
        .await
        .unwrap();
    assert_eq!(
        report.deleted,
        vec!["menu:12:full:restaurant=7", "menuitem:40:details:menu=12"]
    );
    assert_eq!(backend.deleted_keys().len(), 3);
}
