//! Dependency graph between cached views.
//!
//! A rule maps an entity pattern to the patterns of the views derived from
//! it. Placeholders captured by the entity pattern are substituted into the
//! dependents, so `restaurant:{id}` can point at `menu:*:**:restaurant={id}:**`.
//! The graph is built once, validated, and shared immutably.

use serde::Serialize;
use std::collections::HashSet;
use vista_core::{KeyPattern, VistaError, VistaResult};

/// One `entity -> dependents` rule.
#[derive(Debug, Clone)]
pub struct DependencyRule {
    pub entity: KeyPattern,
    pub dependents: Vec<KeyPattern>,
}

impl DependencyRule {
    /// Parse and validate a rule.
    ///
    /// Every placeholder a dependent uses must be captured by the entity
    /// pattern.
    pub fn new<S: AsRef<str>>(entity: &str, dependents: &[S]) -> VistaResult<Self> {
        let entity = KeyPattern::parse(entity)?;
        let dependents = dependents
            .iter()
            .map(|d| KeyPattern::parse(d.as_ref()))
            .collect::<VistaResult<Vec<_>>>()?;

        for dependent in &dependents {
            if let Some(missing) = dependent
                .placeholders()
                .iter()
                .find(|p| !entity.placeholders().contains(p))
            {
                return Err(VistaError::invalid_pattern(
                    dependent.as_str(),
                    format!(
                        "placeholder '{}' is not captured by '{}'",
                        missing,
                        entity.as_str()
                    ),
                ));
            }
        }
        Ok(Self { entity, dependents })
    }
}

/// Serializable view of a rule, for inspection output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub entity: String,
    pub dependents: Vec<String>,
}

/// Immutable set of dependency rules.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    rules: Vec<DependencyRule>,
}

impl DependencyGraph {
    pub fn builder() -> DependencyGraphBuilder {
        DependencyGraphBuilder::default()
    }

    /// Rules for the restaurant domain.
    ///
    /// Entity keys are `{kind}:{id}`, views `{kind}:{id}:{view}`, and
    /// ownership is expressed with discriminators such as `restaurant=7`.
    /// Only an entity key fans out to everything it owns; a view only reaches
    /// the views built from it.
    pub fn restaurant_defaults() -> VistaResult<Self> {
        Self::builder()
            .rule(
                "restaurant:{id}",
                &[
                    "restaurant:{id}:*",
                    "menu:*:**:restaurant={id}:**",
                    "employee:*:**:restaurant={id}:**",
                    "order:*:**:restaurant={id}:**",
                ],
            )
            .rule("menu:{id}", &["menu:{id}:*", "menuitem:*:**:menu={id}:**"])
            .rule("menuitem:{id}", &["menuitem:{id}:*"])
            .rule("order:{id}", &["order:{id}:*"])
            .rule("employee:{id}", &["employee:{id}:*"])
            .rule("user:{id}", &["user:{id}:*"])
            // the dashboard shows today's orders
            .rule("restaurant:{id}:orders", &["restaurant:{id}:dashboard"])
            // a full menu embeds its items
            .rule("menu:{id}:full:**", &["menuitem:*:**:menu={id}:**"])
            .build()
    }

    pub fn rules(&self) -> &[DependencyRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Direct dependent patterns of a key, instantiated and deduplicated in
    /// rule order.
    pub fn dependents_of(&self, key: &str) -> VistaResult<Vec<KeyPattern>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for rule in &self.rules {
            let Some(captures) = rule.entity.captures(key) else {
                continue;
            };
            for dependent in &rule.dependents {
                let pattern = dependent.instantiate(&captures)?;
                if seen.insert(pattern.as_str().to_string()) {
                    out.push(pattern);
                }
            }
        }
        Ok(out)
    }

    pub fn summary(&self) -> Vec<RuleSummary> {
        self.rules
            .iter()
            .map(|r| RuleSummary {
                entity: r.entity.as_str().to_string(),
                dependents: r.dependents.iter().map(|d| d.as_str().to_string()).collect(),
            })
            .collect()
    }
}

/// Collects rules, keeping the first parse error.
#[derive(Debug, Default)]
pub struct DependencyGraphBuilder {
    rules: Vec<DependencyRule>,
    error: Option<VistaError>,
}

impl DependencyGraphBuilder {
    pub fn rule<S: AsRef<str>>(mut self, entity: &str, dependents: &[S]) -> Self {
        if self.error.is_none() {
            match DependencyRule::new(entity, dependents) {
                Ok(rule) => self.rules.push(rule),
                Err(e) => self.error = Some(e),
            }
        }
        self
    }

    pub fn build(self) -> VistaResult<DependencyGraph> {
        match self.error {
            Some(e) => Err(e),
            None => {
                tracing::debug!(rules = self.rules.len(), "Dependency graph built");
                Ok(DependencyGraph { rules: self.rules })
            }
        }
    }
}
