//! Recompute callbacks for cached views.
//!
//! The host application registers one callback per key pattern. The
//! invalidator's Update strategy and the warmer both look callbacks up by
//! concrete key; the first registration whose pattern matches wins.

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use vista_core::{CacheTier, Captures, KeyPattern, VistaError, VistaResult};
use vista_storage::MetricsCollector;

/// What a callback is asked to recompute.
#[derive(Debug, Clone)]
pub struct RecomputeContext {
    pub key: String,
    /// Placeholder values from the registration pattern
    pub captures: Captures,
    pub tier: CacheTier,
}

impl RecomputeContext {
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// Computes the fresh value of a cached view.
#[async_trait]
pub trait Recompute: Send + Sync {
    async fn recompute(&self, ctx: &RecomputeContext) -> VistaResult<Value>;
}

/// Adapter turning an async closure into a [`Recompute`].
pub struct FnRecompute<F> {
    f: F,
}

impl<F, Fut> FnRecompute<F>
where
    F: Fn(RecomputeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VistaResult<Value>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Recompute for FnRecompute<F>
where
    F: Fn(RecomputeContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = VistaResult<Value>> + Send + 'static,
{
    async fn recompute(&self, ctx: &RecomputeContext) -> VistaResult<Value> {
        (self.f)(ctx.clone()).await
    }
}

struct Registration {
    pattern: KeyPattern,
    tier: CacheTier,
    callback: Arc<dyn Recompute>,
}

/// Callback found for a key.
#[derive(Clone)]
pub struct Resolved {
    pub context: RecomputeContext,
    pub callback: Arc<dyn Recompute>,
}

/// Key pattern to callback table.
#[derive(Default)]
pub struct RecomputeRegistry {
    registrations: Vec<Registration>,
}

impl std::fmt::Debug for RecomputeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.registrations.iter().map(|r| r.pattern.as_str()))
            .finish()
    }
}

impl RecomputeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every key matching `pattern`, stored at `tier`.
    pub fn register(
        &mut self,
        pattern: &str,
        tier: CacheTier,
        callback: Arc<dyn Recompute>,
    ) -> VistaResult<()> {
        let pattern = KeyPattern::parse(pattern)?;
        tracing::debug!(pattern = %pattern, tier = %tier, "Recompute callback registered");
        self.registrations.push(Registration {
            pattern,
            tier,
            callback,
        });
        Ok(())
    }

    /// Builder-style [`register`](Self::register) for closures.
    pub fn with_fn<F, Fut>(mut self, pattern: &str, tier: CacheTier, f: F) -> VistaResult<Self>
    where
        F: Fn(RecomputeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = VistaResult<Value>> + Send + 'static,
    {
        self.register(pattern, tier, Arc::new(FnRecompute::new(f)))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn resolve(&self, key: &str) -> Option<Resolved> {
        self.registrations.iter().find_map(|r| {
            r.pattern.captures(key).map(|captures| Resolved {
                context: RecomputeContext {
                    key: key.to_string(),
                    captures,
                    tier: r.tier,
                },
                callback: Arc::clone(&r.callback),
            })
        })
    }

    /// Run the callback for `key`, recording how long it took, or a
    /// `recompute` error when it fails.
    ///
    /// `None` when nothing is registered for the key. Callback errors come
    /// back as `RecomputeFailure`.
    pub async fn recompute(
        &self,
        key: &str,
        metrics: &MetricsCollector,
    ) -> Option<VistaResult<(Value, CacheTier)>> {
        let resolved = self.resolve(key)?;
        let started = Instant::now();
        let outcome = match resolved.callback.recompute(&resolved.context).await {
            Ok(value) => {
                metrics.record_regeneration(key, started.elapsed());
                return Some(Ok((value, resolved.context.tier)));
            }
            Err(e @ VistaError::RecomputeFailure { .. }) => e,
            Err(e) => VistaError::recompute(key, e),
        };
        metrics.record_error("recompute");
        Some(Err(outcome))
    }
}
