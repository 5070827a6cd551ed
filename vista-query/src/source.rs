//! Data sources the router can send queries to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use vista_core::VistaResult;

/// Tabular result of a raw query.
///
/// Column names, row values and column type names are all kept so that a
/// cached result is indistinguishable from a fresh one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub column_types: Vec<String>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, column_types: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            column_types,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as column-name keyed JSON objects.
    pub fn to_objects(&self) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }
}

/// Connection pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub size: usize,
    pub busy: usize,
    pub available: usize,
}

impl PoolStats {
    /// Busy connections as a percent of the pool, two decimals.
    pub fn utilization(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            (self.busy as f64 / self.size as f64 * 10_000.0).round() / 100.0
        }
    }
}

/// A relational data source (primary, replica or analytics).
#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn query(&self, sql: &str, params: &[Value]) -> VistaResult<QueryResult>;

    /// Cheap liveness check, e.g. `SELECT 1`.
    async fn probe(&self) -> VistaResult<()>;

    /// Seconds the slowest replica is behind. Only asked of the primary.
    async fn replication_lag_seconds(&self) -> VistaResult<f64>;

    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

/// What a query does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Analytics,
    Reporting,
    Read,
    Write,
    Transaction,
    Unspecified,
}

/// How fresh the result has to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    Strong,
    Immediate,
    Eventual,
    Weak,
    Unspecified,
}

/// Where a query ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    Primary,
    Replica,
    Analytics,
}

impl RouteTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
            Self::Analytics => "analytics",
        }
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_result_round_trip() {
        let result = QueryResult::new(
            vec!["id".into(), "name".into()],
            vec!["int8".into(), "text".into()],
            vec![vec![json!(1), json!("Margherita")], vec![json!(2), Value::Null]],
        );
        let encoded = serde_json::to_vec(&result).unwrap();
        let decoded: QueryResult = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(decoded, result);
        assert_eq!(decoded.to_objects()[0]["name"], json!("Margherita"));

        let empty = QueryResult::new(vec!["id".into()], vec!["int8".into()], vec![]);
        let decoded: QueryResult =
            serde_json::from_slice(&serde_json::to_vec(&empty).unwrap()).unwrap();
        assert_eq!(decoded, empty);
        assert!(decoded.is_empty());
        assert_eq!(decoded.columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_pool_utilization() {
        let stats = PoolStats {
            size: 3,
            busy: 1,
            available: 2,
        };
        assert_eq!(stats.utilization(), 33.33);
        assert_eq!(
            PoolStats {
                size: 0,
                busy: 0,
                available: 0
            }
            .utilization(),
            0.0
        );
    }
}
