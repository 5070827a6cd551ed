//! In-process cache backend.
//!
//! Backed by a `DashMap` with lazy expiry: expired entries are dropped the
//! next time they are touched. Native pattern scanning can be switched off
//! to exercise the adapter's registry path.

use super::traits::{CacheBackend, MemoryStats};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use vista_core::VistaResult;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`CacheBackend`].
#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    pattern_scan: bool,
    peak_bytes: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            pattern_scan: true,
            peak_bytes: AtomicU64::new(0),
        }
    }

    /// Toggle native pattern scanning.
    pub fn with_pattern_scan(mut self, enabled: bool) -> Self {
        self.pattern_scan = enabled;
        self
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.purge_expired();
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.purge_expired();
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn used_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| (e.key().len() + e.value().value.len()) as u64)
            .sum()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> VistaResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> VistaResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> VistaResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> VistaResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    fn supports_pattern_scan(&self) -> bool {
        self.pattern_scan
    }

    async fn scan(&self, glob: &str) -> VistaResult<Vec<String>> {
        self.purge_expired();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| glob_matches(glob, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn memory_stats(&self) -> VistaResult<Option<MemoryStats>> {
        self.purge_expired();
        let used = self.used_bytes();
        let peak = self.peak_bytes.fetch_max(used, Ordering::Relaxed).max(used);
        Ok(Some(MemoryStats {
            used_bytes: used,
            peak_bytes: peak,
            fragmentation_ratio: 1.0,
        }))
    }
}

/// Backend-style glob where `*` matches any run of characters, separators included.
pub(crate) fn glob_matches(glob: &str, key: &str) -> bool {
    let parts: Vec<&str> = glob.split('*').collect();
    if parts.len() == 1 {
        return glob == key;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::new();
        backend.set("menu:1", b"a".to_vec(), None).await.unwrap();
        assert_eq!(backend.get("menu:1").await.unwrap(), Some(b"a".to_vec()));
        assert!(backend.delete("menu:1").await.unwrap());
        assert!(!backend.delete("menu:1").await.unwrap());
        assert!(!backend.exists("menu:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_vanish() {
        let backend = MemoryBackend::new();
        backend
            .set("menu:1", b"a".to_vec(), Some(Duration::from_millis(0)))
            .await
            .unwrap();
        assert_eq!(backend.get("menu:1").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_scan_uses_glob() {
        let backend = MemoryBackend::new();
        for key in ["menu:1:full", "menu:2:full", "order:1"] {
            backend.set(key, vec![1], None).await.unwrap();
        }
        assert_eq!(
            backend.scan("menu:*").await.unwrap(),
            vec!["menu:1:full".to_string(), "menu:2:full".to_string()]
        );
        assert_eq!(backend.scan("*:full").await.unwrap().len(), 2);
    }

    #[test]
    fn test_glob_matches() {
        assert!(glob_matches("restaurant:7*", "restaurant:7:dashboard"));
        assert!(glob_matches("*", "anything"));
        assert!(glob_matches("a*b*c", "a:x:b:y:c"));
        assert!(!glob_matches("a*b*c", "a:x:c"));
        assert!(!glob_matches("exact", "exact:no"));
    }

    #[tokio::test]
    async fn test_memory_stats_track_usage() {
        let backend = MemoryBackend::new();
        backend.set("k", vec![0; 10], None).await.unwrap();
        let stats = backend.memory_stats().await.unwrap().unwrap();
        assert_eq!(stats.used_bytes, 11);
        assert!(stats.peak_bytes >= 11);
    }
}
