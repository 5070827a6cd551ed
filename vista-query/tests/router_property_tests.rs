//! Property-Based Tests for Query Routing and the L2 Result Cache
//!
//! Properties:
//! - writes, transactions and strong reads never leave the primary, and an
//!   unhealthy replica never receives a query
//! - a result served from the L2 cache is identical to the fresh one,
//!   whatever its shape
//! - reformatting a query's whitespace never causes a second execution

use proptest::prelude::*;
use std::sync::Arc;
use vista_query::{
    decide, Consistency, L2QueryCache, QueryCacheType, QueryRouter, QueryType, RouteTarget,
    RouterConfig,
};
use vista_test_utils::{generators, memory_store, MockDataSource, QueryResult};

fn arb_query_type() -> impl Strategy<Value = QueryType> {
    prop::sample::select(vec![
        QueryType::Analytics,
        QueryType::Reporting,
        QueryType::Read,
        QueryType::Write,
        QueryType::Transaction,
        QueryType::Unspecified,
    ])
}

fn arb_consistency() -> impl Strategy<Value = Consistency> {
    prop::sample::select(vec![
        Consistency::Strong,
        Consistency::Immediate,
        Consistency::Eventual,
        Consistency::Weak,
        Consistency::Unspecified,
    ])
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_routing_table_invariants(
        query_type in arb_query_type(),
        consistency in arb_consistency(),
        healthy in any::<bool>(),
    ) {
        let target = decide(query_type, consistency, healthy);

        if matches!(query_type, QueryType::Write | QueryType::Transaction) {
            prop_assert_eq!(target, RouteTarget::Primary);
        }
        if query_type == QueryType::Read
            && matches!(consistency, Consistency::Strong | Consistency::Immediate)
        {
            prop_assert_eq!(target, RouteTarget::Primary);
        }
        if !healthy {
            prop_assert_ne!(target, RouteTarget::Replica);
        }
        if matches!(query_type, QueryType::Analytics | QueryType::Reporting) {
            prop_assert_eq!(target, RouteTarget::Analytics);
        }
    }

    #[test]
    fn prop_cached_result_is_identical(result in generators::arb_query_result()) {
        runtime().block_on(async {
            let primary = Arc::new(MockDataSource::new("primary").with_result(result.clone()));
            let router = QueryRouter::new(primary.clone(), RouterConfig::default());
            let l2 = L2QueryCache::new(memory_store(), router);

            let fresh = l2.fetch_query("SELECT * FROM t", &[], QueryCacheType::Default, false).await.unwrap();
            let cached = l2.fetch_query("SELECT * FROM t", &[], QueryCacheType::Default, false).await.unwrap();

            assert_eq!(fresh, result);
            assert_eq!(cached, result);
            assert_eq!(primary.query_count(), 1);
        });
    }

    #[test]
    fn prop_whitespace_variants_share_one_execution(
        (sql, variant) in generators::arb_sql()
            .prop_flat_map(|sql| (Just(sql.clone()), generators::arb_whitespace_variant(sql))),
        params in generators::arb_params(),
    ) {
        runtime().block_on(async {
            let primary = Arc::new(MockDataSource::new("primary"));
            let router = QueryRouter::new(primary.clone(), RouterConfig::default());
            let l2 = L2QueryCache::new(memory_store(), router);

            l2.fetch_query(&sql, &params, QueryCacheType::Aggregate, false).await.unwrap();
            l2.fetch_query(&variant, &params, QueryCacheType::Aggregate, false).await.unwrap();

            assert_eq!(primary.query_count(), 1);
            assert_eq!(l2.stats().hits, 1);
        });
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn test_lagging_replica_sends_reads_to_primary() {
    let primary = Arc::new(MockDataSource::new("primary").with_lag(10.0));
    let replica = Arc::new(MockDataSource::new("replica"));
    let router = QueryRouter::with_sources(
        primary.clone(),
        Some(replica.clone()),
        None,
        RouterConfig::default(),
    );

    let state = router.check_replica_health().await;
    assert!(!state.healthy);
    assert_eq!(state.lag_seconds, Some(10.0));

    let routed = router
        .execute_routed("SELECT 1", &[], QueryType::Read, Consistency::Eventual)
        .await
        .unwrap();
    assert_eq!(routed.target, RouteTarget::Primary);
    assert_eq!(replica.query_count(), 0);
    assert_eq!(primary.query_count(), 1);
    let stats = router.stats();
    assert_eq!(stats.replica_fallbacks, 1);
    assert_eq!(stats.fallbacks, 0);
}

#[tokio::test]
async fn test_replica_recovers_once_lag_drops() {
    let primary = Arc::new(MockDataSource::new("primary").with_lag(10.0));
    let replica = Arc::new(MockDataSource::new("replica"));
    let router = QueryRouter::with_sources(
        primary.clone(),
        Some(replica.clone()),
        None,
        RouterConfig::default(),
    );

    assert!(!router.check_replica_health().await.healthy);
    primary.set_lag(1.0);
    assert!(router.check_replica_health().await.healthy);

    let routed = router
        .execute_routed("SELECT 1", &[], QueryType::Read, Consistency::Eventual)
        .await
        .unwrap();
    assert_eq!(routed.target, RouteTarget::Replica);
}

#[tokio::test]
async fn test_failing_replica_falls_back_and_is_marked_unhealthy() {
    let primary = Arc::new(MockDataSource::new("primary"));
    let replica = Arc::new(MockDataSource::new("replica").failing());
    let router = QueryRouter::with_sources(
        primary.clone(),
        Some(replica.clone()),
        None,
        RouterConfig::default(),
    );
    assert!(router.check_replica_health().await.healthy);

    let routed = router
        .execute_routed("SELECT 1", &[], QueryType::Read, Consistency::Weak)
        .await
        .unwrap();
    assert!(routed.fell_back);
    assert_eq!(routed.target, RouteTarget::Primary);
    assert!(!router.replica_healthy());
    assert_eq!(router.stats().fallbacks, 1);
}

#[tokio::test]
async fn test_primary_failure_is_surfaced_by_l2() {
    let primary = Arc::new(MockDataSource::new("primary").failing());
    let router = QueryRouter::new(primary, RouterConfig::default());
    let l2 = L2QueryCache::new(memory_store(), router);

    let result = l2
        .fetch_query("SELECT 1", &[], QueryCacheType::Dashboard, false)
        .await;
    vista_test_utils::assertions::assert_backend_unavailable(&result);
    assert_eq!(l2.stats().errors, 1);
}

#[tokio::test]
async fn test_report_queries_route_to_analytics() {
    let primary = Arc::new(MockDataSource::new("primary"));
    let analytics = Arc::new(MockDataSource::new("analytics").with_result(QueryResult::default()));
    let router = QueryRouter::with_sources(
        primary.clone(),
        None,
        Some(analytics.clone()),
        RouterConfig::default(),
    );
    let l2 = L2QueryCache::new(memory_store(), router.clone());

    l2.fetch_query("SELECT sum(total) FROM orders", &[], QueryCacheType::Report, false)
        .await
        .unwrap();
    assert_eq!(analytics.query_count(), 1);
    assert_eq!(primary.query_count(), 0);
    assert_eq!(router.stats().analytics, 1);
}
