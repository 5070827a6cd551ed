//! Segment-aware key patterns.
//!
//! Patterns are split on `:` like keys. Within a segment, `*` matches any run
//! of non-separator characters and `{name}` captures one. A segment that is
//! exactly `**` matches zero or more whole segments; a trailing `*` segment
//! matches the remainder of the key (one or more segments), the same way a
//! prefix glob behaves on the backend.

use crate::key::CacheKey;
use crate::{VistaError, VistaResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Values captured by `{name}` placeholders.
pub type Captures = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Star,
    Capture(String),
}

/// A compiled key pattern.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
    placeholders: Vec<String>,
    concrete: bool,
}

impl KeyPattern {
    pub fn parse(source: impl Into<String>) -> VistaResult<Self> {
        let source = source.into();
        if source.is_empty() {
            return Err(VistaError::invalid_pattern(source, "pattern is empty"));
        }

        let segments: Vec<&str> = source.split(':').collect();
        let count = segments.len();
        let mut placeholders = Vec::new();
        let mut concrete = true;
        let mut expr = String::from("^");
        let mut need_separator = false;

        for (index, segment) in segments.iter().enumerate() {
            let last = index + 1 == count;
            if segment.is_empty() {
                return Err(VistaError::invalid_pattern(source.as_str(), "empty segment"));
            }

            if *segment == "**" {
                concrete = false;
                if index == 0 && last {
                    expr.push_str(".*");
                } else if index == 0 {
                    expr.push_str("(?:[^:]+:)*");
                } else {
                    expr.push_str("(?::[^:]+)*");
                }
                continue;
            }

            if need_separator {
                expr.push(':');
            }
            need_separator = true;

            if *segment == "*" {
                concrete = false;
                if last {
                    expr.push_str("[^:]+(?::[^:]+)*");
                } else {
                    expr.push_str("[^:]+");
                }
                continue;
            }

            for piece in parse_segment(&source, segment)? {
                match piece {
                    Piece::Literal(text) => expr.push_str(&regex::escape(&text)),
                    Piece::Star => {
                        concrete = false;
                        expr.push_str("[^:]*");
                    }
                    Piece::Capture(name) => {
                        concrete = false;
                        if placeholders.contains(&name) {
                            return Err(VistaError::invalid_pattern(
                                source.as_str(),
                                format!("placeholder '{}' appears twice", name),
                            ));
                        }
                        expr.push_str(&format!("(?P<{}>[^:]+)", name));
                        placeholders.push(name);
                    }
                }
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| VistaError::invalid_pattern(source.as_str(), e.to_string()))?;

        Ok(Self {
            source,
            regex,
            placeholders,
            concrete,
        })
    }

    /// Pattern that matches exactly one key.
    pub fn exact(key: &CacheKey) -> VistaResult<Self> {
        Self::parse(key.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// No wildcards and no placeholders: denotes a single key.
    pub fn is_concrete(&self) -> bool {
        self.concrete
    }

    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Placeholder values when `key` matches.
    pub fn captures(&self, key: &str) -> Option<Captures> {
        let caps = self.regex.captures(key)?;
        Some(
            self.placeholders
                .iter()
                .filter_map(|name| {
                    caps.name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }

    /// Substitute captured values into this pattern's placeholders.
    pub fn instantiate(&self, captures: &Captures) -> VistaResult<KeyPattern> {
        let mut rendered = self.source.clone();
        for name in &self.placeholders {
            let value = captures.get(name).ok_or_else(|| {
                VistaError::invalid_pattern(
                    self.source.as_str(),
                    format!("no value captured for placeholder '{}'", name),
                )
            })?;
            rendered = rendered.replace(&format!("{{{}}}", name), value);
        }
        KeyPattern::parse(rendered)
    }

    /// Literal first segment, when there is one.
    pub fn namespace(&self) -> Option<&str> {
        let first = self.source.split(':').next()?;
        if first.contains('*') || first.contains('{') {
            None
        } else {
            Some(first)
        }
    }

    /// Text before the first wildcard or placeholder.
    pub fn literal_prefix(&self) -> &str {
        let end = self
            .source
            .find(|c| c == '*' || c == '{')
            .unwrap_or(self.source.len());
        &self.source[..end]
    }

    /// Coarse backend glob covering every key this pattern matches.
    ///
    /// Backend globs let `*` cross separators, so results must be filtered
    /// through [`KeyPattern::matches`].
    pub fn to_glob(&self) -> String {
        if self.concrete {
            self.source.clone()
        } else {
            format!("{}*", self.literal_prefix())
        }
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for KeyPattern {}

impl std::hash::Hash for KeyPattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for KeyPattern {
    type Err = VistaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyPattern::parse(s)
    }
}

fn parse_segment(source: &str, segment: &str) -> VistaResult<Vec<Piece>> {
    let mut pieces = Vec::new();
    let mut literal = String::new();
    let mut chars = segment.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                pieces.push(Piece::Star);
            }
            '{' => {
                if !literal.is_empty() {
                    pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                }
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(VistaError::invalid_pattern(source, "unclosed placeholder"));
                }
                if !is_identifier(&name) {
                    return Err(VistaError::invalid_pattern(
                        source,
                        format!("invalid placeholder name '{}'", name),
                    ));
                }
                pieces.push(Piece::Capture(name));
            }
            '}' => {
                return Err(VistaError::invalid_pattern(source, "unmatched '}'"));
            }
            c if c.is_whitespace() => {
                return Err(VistaError::invalid_pattern(source, "whitespace in pattern"));
            }
            c => literal.push(c),
        }
    }
    if !literal.is_empty() {
        pieces.push(Piece::Literal(literal));
    }
    Ok(pieces)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> KeyPattern {
        KeyPattern::parse(s).unwrap()
    }

    #[test]
    fn test_trailing_star_is_prefix() {
        let p = pattern("restaurant:7:*");
        assert!(p.matches("restaurant:7:dashboard"));
        assert!(p.matches("restaurant:7:orders:today"));
        assert!(!p.matches("restaurant:7"));
        assert!(!p.matches("restaurant:70:dashboard"));
    }

    #[test]
    fn test_double_star_matches_zero_or_more() {
        let p = pattern("menu:*:**:restaurant={id}:**");
        assert!(p.matches("menu:12:restaurant=7"));
        assert!(p.matches("menu:12:full:locale=en:restaurant=7"));
        assert!(!p.matches("menu:12:full:restaurant=8"));
        assert_eq!(
            p.captures("menu:12:full:restaurant=7").unwrap().get("id"),
            Some(&"7".to_string())
        );
    }

    #[test]
    fn test_entity_pattern_captures_id() {
        let p = pattern("restaurant:{id}:**");
        assert!(p.matches("restaurant:7"));
        assert!(p.matches("restaurant:7:dashboard"));
        let caps = p.captures("restaurant:7:dashboard").unwrap();
        assert_eq!(caps.get("id").map(String::as_str), Some("7"));
    }

    #[test]
    fn test_instantiate_substitutes_placeholders() {
        let mut caps = Captures::new();
        caps.insert("id".into(), "7".into());
        let p = pattern("order:*:**:restaurant={id}:**").instantiate(&caps).unwrap();
        assert_eq!(p.as_str(), "order:*:**:restaurant=7:**");
        assert!(p.matches("order:99:restaurant=7"));

        let err = pattern("menu:{menu_id}").instantiate(&caps);
        assert!(err.is_err());
    }

    #[test]
    fn test_concrete_and_glob() {
        let p = pattern("restaurant:7:dashboard");
        assert!(p.is_concrete());
        assert_eq!(p.to_glob(), "restaurant:7:dashboard");
        assert_eq!(pattern("menu:*:**:restaurant=7").to_glob(), "menu:*");
        assert_eq!(pattern("restaurant:{id}").namespace(), Some("restaurant"));
        assert_eq!(pattern("*:7").namespace(), None);
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["", "a::b", "a:{id", "a:{1x}", "a:}b", "a:{id}:{id}", "a b"] {
            assert!(KeyPattern::parse(bad).is_err(), "{:?} should fail", bad);
        }
    }
}
