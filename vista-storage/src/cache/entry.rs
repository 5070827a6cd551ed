//! Stored cache entry envelope.
//!
//! Every value written through the adapter is wrapped with its tier and
//! write timestamps so readers can reason about age without asking the
//! backend for a TTL.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use vista_core::{CacheTier, VistaError, VistaResult};

/// A cached value with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub tier: CacheTier,
    pub written_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    /// Wrap a freshly computed value; expiry follows the tier TTL.
    pub fn new(value: T, tier: CacheTier) -> Self {
        Self::with_ttl(value, tier, Some(tier.ttl()))
    }

    pub fn with_ttl(value: T, tier: CacheTier, ttl: Option<Duration>) -> Self {
        let written_at = Utc::now();
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| written_at + ttl);
        Self {
            value,
            tier,
            written_at,
            expires_at,
        }
    }

    /// Remaining lifetime, `None` when the entry never expires.
    pub fn ttl_remaining(&self) -> Option<Duration> {
        self.expires_at.map(|expires| {
            (expires - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Age of the entry.
    pub fn staleness(&self) -> Duration {
        (Utc::now() - self.written_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_fresh_as_of(&self, timestamp: DateTime<Utc>) -> bool {
        self.written_at >= timestamp
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn map<U, F>(self, f: F) -> CacheEntry<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheEntry {
            value: f(self.value),
            tier: self.tier,
            written_at: self.written_at,
            expires_at: self.expires_at,
        }
    }
}

impl<T: Serialize> CacheEntry<T> {
    pub fn encode(&self, key: &str) -> VistaResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| VistaError::serialization(key, e))
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    pub fn decode(key: &str, bytes: &[u8]) -> VistaResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| VistaError::serialization(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_encodes_envelope() {
        let entry = CacheEntry::new(json!({"orders": 12}), CacheTier::Hot);
        let bytes = entry.encode("restaurant:7:dashboard").unwrap();
        let decoded: CacheEntry<serde_json::Value> =
            CacheEntry::decode("restaurant:7:dashboard", &bytes).unwrap();
        assert_eq!(decoded, entry);
        assert!(decoded.ttl_remaining().unwrap() <= CacheTier::Hot.ttl());
    }

    #[test]
    fn test_decode_failure_is_serialization_error() {
        let err = CacheEntry::<serde_json::Value>::decode("k", b"not json").unwrap_err();
        assert!(matches!(err, VistaError::SerializationFailure { .. }));
    }

    #[test]
    fn test_without_ttl_never_expires() {
        let entry = CacheEntry::with_ttl(1u64, CacheTier::Archive, None);
        assert!(entry.expires_at.is_none());
        assert!(entry.ttl_remaining().is_none());
    }
}
