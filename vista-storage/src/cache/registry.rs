//! Namespace-indexed registry of keys written through the adapter.
//!
//! Backends without a native pattern scan resolve pattern operations
//! against this registry. Patterns with a literal first segment only look
//! at that namespace instead of the whole key space.

use dashmap::{DashMap, DashSet};
use vista_core::{namespace_of, KeyPattern};

#[derive(Debug, Default)]
pub struct KeyRegistry {
    by_namespace: DashMap<String, DashSet<String>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: &str) {
        self.by_namespace
            .entry(namespace_of(key).to_string())
            .or_default()
            .insert(key.to_string());
    }

    pub fn unregister(&self, key: &str) {
        if let Some(set) = self.by_namespace.get(namespace_of(key)) {
            set.remove(key);
        }
    }

    /// Registered keys matching `pattern`, sorted.
    pub fn matching(&self, pattern: &KeyPattern) -> Vec<String> {
        let mut keys: Vec<String> = match pattern.namespace() {
            Some(namespace) => self
                .by_namespace
                .get(namespace)
                .map(|set| {
                    set.iter()
                        .filter(|k| pattern.matches(k.key()))
                        .map(|k| k.key().clone())
                        .collect()
                })
                .unwrap_or_default(),
            None => self
                .by_namespace
                .iter()
                .flat_map(|set| {
                    set.iter()
                        .filter(|k| pattern.matches(k.key()))
                        .map(|k| k.key().clone())
                        .collect::<Vec<_>>()
                })
                .collect(),
        };
        keys.sort();
        keys
    }

    /// Every registered key.
    pub fn keys(&self) -> Vec<String> {
        self.by_namespace
            .iter()
            .flat_map(|set| set.iter().map(|k| k.key().clone()).collect::<Vec<_>>())
            .collect()
    }

    pub(crate) fn drop_empty_namespaces(&self) {
        self.by_namespace.retain(|_, set| !set.is_empty());
    }

    pub fn len(&self) -> usize {
        self.by_namespace.iter().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_by_namespace() {
        let registry = KeyRegistry::new();
        for key in [
            "menu:12:full:restaurant=7",
            "menu:13:full:restaurant=8",
            "order:1:summary:restaurant=7",
        ] {
            registry.register(key);
        }

        let pattern = KeyPattern::parse("menu:*:**:restaurant=7:**").unwrap();
        assert_eq!(registry.matching(&pattern), vec!["menu:12:full:restaurant=7"]);

        let anywhere = KeyPattern::parse("*:*:**:restaurant=7:**").unwrap();
        assert_eq!(registry.matching(&anywhere).len(), 2);

        registry.unregister("menu:12:full:restaurant=7");
        assert!(registry.matching(&pattern).is_empty());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_empty_namespaces_are_dropped() {
        let registry = KeyRegistry::new();
        registry.register("menu:12:full");
        registry.register("order:1:summary");
        registry.unregister("menu:12:full");
        registry.drop_empty_namespaces();

        assert_eq!(registry.keys(), vec!["order:1:summary".to_string()]);
        assert_eq!(registry.by_namespace.len(), 1);
    }
}
