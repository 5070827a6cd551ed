//! Query fingerprints for the L2 result cache.
//!
//! Two queries that differ only in whitespace, letter case or comments share
//! a fingerprint. Parameters are hashed separately so that the same statement
//! with different bind values never collides.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Key namespace for cached query results.
pub const L2_NAMESPACE: &str = "l2_query";

static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*").expect("Invalid line comment regex"));
static BLOCK_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("Invalid block comment regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Normalized-query fingerprint, usable directly as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QueryFingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip comments, collapse whitespace, trim and lower-case.
///
/// Comments go first: a `--` comment runs to the end of its line, which
/// would be lost once newlines are collapsed.
pub fn normalize_sql(sql: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(sql, " ");
    let without_lines = LINE_COMMENT.replace_all(&without_blocks, " ");
    WHITESPACE
        .replace_all(&without_lines, " ")
        .trim()
        .to_lowercase()
}

/// Fingerprint `sql` with its bind parameters.
pub fn fingerprint(sql: &str, params: &[Value]) -> QueryFingerprint {
    let sql_digest = hex::encode(Sha256::digest(normalize_sql(sql).as_bytes()));
    // serde_json maps are ordered, so object parameters serialize stably.
    let params_json = serde_json::to_string(params).unwrap_or_else(|_| "[]".to_string());
    let params_digest = hex::encode(Sha256::digest(params_json.as_bytes()));
    QueryFingerprint(format!("{}:{}:{}", L2_NAMESPACE, sql_digest, params_digest))
}
