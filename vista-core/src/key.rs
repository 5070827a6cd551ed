//! Deterministic cache key construction.
//!
//! Keys follow the layout `{domain}:{entity-id}[:{view}...][:{name}={value}...]`.
//! Views keep the order they were added in; discriminators are sorted by name
//! so that the same logical inputs always produce byte-identical keys.

use crate::{VistaError, VistaResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Longest key the backend accepts before hashing kicks in.
pub const MAX_KEY_LENGTH: usize = 250;

/// Readable prefix kept in front of the digest for over-long keys.
pub const HASHED_PREFIX_LENGTH: usize = 50;

/// A fully built cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Start building a key in the given domain.
    pub fn builder(domain: impl Into<String>) -> CacheKeyBuilder {
        CacheKeyBuilder::new(domain)
    }

    /// Shorthand for the bare entity key `{domain}:{id}`.
    pub fn entity(domain: &str, id: impl fmt::Display) -> VistaResult<Self> {
        Self::builder(domain).id(id).build()
    }

    /// Accept an already-rendered key string, validating its segments.
    pub fn parse(raw: impl Into<String>) -> VistaResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(VistaError::invalid_pattern(raw, "key is empty"));
        }
        for segment in raw.split(':') {
            if segment.is_empty() {
                return Err(VistaError::invalid_pattern(raw.clone(), "empty key segment"));
            }
            if let Some(c) = segment.chars().find(|c| is_reserved_in_key(*c)) {
                return Err(VistaError::invalid_pattern(
                    raw.clone(),
                    format!("reserved character '{}' in key", c),
                ));
            }
        }
        Ok(Self(limit_length(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// First segment of the key.
    pub fn namespace(&self) -> &str {
        namespace_of(&self.0)
    }

    /// Whether this key was shortened to a digest form.
    pub fn is_hashed(&self) -> bool {
        self.0.contains(":hash:")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// Builder for [`CacheKey`].
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    domain: String,
    id: Option<String>,
    views: Vec<String>,
    discriminators: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            id: None,
            views: Vec::new(),
            discriminators: BTreeMap::new(),
        }
    }

    pub fn id(mut self, id: impl fmt::Display) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Append a view segment. Order is preserved.
    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.views.push(view.into());
        self
    }

    /// Add a `name=value` discriminator. A repeated name keeps the last value.
    pub fn discriminator(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.discriminators.insert(name.into(), value.to_string());
        self
    }

    pub fn build(self) -> VistaResult<CacheKey> {
        validate_component("domain", &self.domain)?;
        let mut parts = vec![self.domain];

        if let Some(id) = self.id {
            validate_component("id", &id)?;
            parts.push(id);
        }
        for view in self.views {
            validate_component("view", &view)?;
            parts.push(view);
        }
        for (name, value) in self.discriminators {
            validate_component("discriminator name", &name)?;
            validate_component("discriminator value", &value)?;
            parts.push(format!("{}={}", name, value));
        }

        Ok(CacheKey(limit_length(parts.join(":"))))
    }
}

fn is_reserved_in_key(c: char) -> bool {
    matches!(c, '*' | '{' | '}') || c.is_whitespace()
}

fn validate_component(what: &str, value: &str) -> VistaResult<()> {
    if value.is_empty() {
        return Err(VistaError::invalid_pattern(
            value,
            format!("{} must not be empty", what),
        ));
    }
    if let Some(c) = value
        .chars()
        .find(|c| *c == ':' || *c == '=' || is_reserved_in_key(*c))
    {
        return Err(VistaError::invalid_pattern(
            value,
            format!("{} contains reserved character '{}'", what, c),
        ));
    }
    Ok(())
}

/// Keys over [`MAX_KEY_LENGTH`] bytes become a readable prefix plus a digest.
fn limit_length(key: String) -> String {
    if key.len() <= MAX_KEY_LENGTH {
        return key;
    }
    let mut cut = HASHED_PREFIX_LENGTH;
    while !key.is_char_boundary(cut) {
        cut -= 1;
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}:hash:{}", &key[..cut], digest)
}

/// First segment of a rendered key.
pub fn namespace_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discriminators_are_sorted() {
        let a = CacheKey::builder("menu")
            .id(12)
            .view("full")
            .discriminator("locale", "en")
            .discriminator("restaurant", 7)
            .build()
            .unwrap();
        let b = CacheKey::builder("menu")
            .id(12)
            .view("full")
            .discriminator("restaurant", 7)
            .discriminator("locale", "en")
            .build()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "menu:12:full:locale=en:restaurant=7");
    }

    #[test]
    fn test_views_keep_order() {
        let key = CacheKey::builder("restaurant")
            .id(7)
            .view("orders")
            .view("today")
            .build()
            .unwrap();
        assert_eq!(key.as_str(), "restaurant:7:orders:today");
        assert_eq!(key.namespace(), "restaurant");
    }

    #[test]
    fn test_reserved_characters_rejected() {
        for bad in ["a:b", "a*", "{id}", "", "two words"] {
            let result = CacheKey::builder("menu").id(bad).build();
            assert!(
                matches!(result, Err(VistaError::InvalidKeyPattern { .. })),
                "expected rejection for {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let long_view = "x".repeat(300);
        let key = CacheKey::builder("report").id(1).view(&long_view).build().unwrap();
        assert!(key.is_hashed());
        assert!(key.as_str().starts_with("report:1:xxx"));
        // 50 readable bytes + ":hash:" + 64 hex chars
        assert_eq!(key.as_str().len(), HASHED_PREFIX_LENGTH + 6 + 64);

        let again = CacheKey::builder("report").id(1).view(&long_view).build().unwrap();
        assert_eq!(key, again);
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(CacheKey::parse("restaurant::dashboard").is_err());
        assert!(CacheKey::parse("restaurant:*").is_err());
        assert_eq!(
            CacheKey::parse("restaurant:7:dashboard").unwrap().as_str(),
            "restaurant:7:dashboard"
        );
    }
}
