/// Dependency inspector - shows what invalidating a key would touch
///
/// Usage: vista-inspect <key> [--rules]
///
/// Runs against an in-memory store seeded with a small restaurant dataset,
/// using the default restaurant dependency rules.
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vista_core::{CacheTier, VistaResult};
use vista_engine::{DependencyGraph, DependencyNode, Invalidator, RecomputeRegistry};
use vista_storage::{CacheStore, MemoryBackend, MetricsCollector, MetricsConfig, StoreConfig};

const SEED: &[(&str, u64)] = &[
    ("restaurant:7:dashboard", 420),
    ("restaurant:7:orders", 310),
    ("restaurant:7:analytics:days=30", 1800),
    ("restaurant:8:dashboard", 400),
    ("menu:12:full:restaurant=7", 650),
    ("menu:13:full:restaurant=8", 600),
    ("menuitem:40:details:menu=12", 90),
    ("menuitem:41:details:menu=12", 85),
    ("employee:3:summary:restaurant=7", 120),
    ("order:99:summary:restaurant=7", 60),
];

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("vista_engine=info,warn"));
    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("Failed to init tracing: {}", e);
    }
}

async fn seeded_store() -> VistaResult<CacheStore> {
    let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default())?);
    let store = CacheStore::new(Arc::new(MemoryBackend::new()), metrics, StoreConfig::default());
    for (key, regeneration_ms) in SEED {
        store
            .put_value(key, json!({ "key": key, "seeded": true }), CacheTier::Warm)
            .await?;
        store
            .metrics()
            .record_regeneration(key, Duration::from_millis(*regeneration_ms));
    }
    Ok(store)
}

fn print_tree(node: &DependencyNode, depth: usize) {
    println!("{}{}", "  ".repeat(depth), node.key);
    for child in &node.dependents {
        print_tree(child, depth + 1);
    }
}

async fn run(key: &str, show_rules: bool) -> VistaResult<()> {
    let graph = DependencyGraph::restaurant_defaults()?;
    if show_rules {
        for rule in graph.summary() {
            println!("{} -> {}", rule.entity, rule.dependents.join(", "));
        }
        println!();
    }

    let store = seeded_store().await?;
    let invalidator = Invalidator::new(Arc::new(graph), store, Arc::new(RecomputeRegistry::new()));

    println!("Dependency tree:");
    print_tree(&invalidator.dependency_tree(key).await?, 1);
    println!();

    let impact = invalidator.analyze_invalidation_impact(key).await?;
    let rendered = serde_json::to_string_pretty(&impact)
        .map_err(|e| vista_core::VistaError::serialization("impact analysis", e))?;
    println!("Impact:\n{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let show_rules = args.iter().any(|a| a == "--rules");
    let Some(key) = args.iter().find(|a| !a.starts_with("--")) else {
        eprintln!("Usage: vista-inspect <key> [--rules]");
        eprintln!();
        eprintln!("Example:");
        eprintln!("  vista-inspect restaurant:7 --rules");
        std::process::exit(1);
    };

    if let Err(e) = run(key, show_rules).await {
        eprintln!("vista-inspect: {}", e);
        std::process::exit(1);
    }
}
