//! PostgreSQL data source.
//!
//! Pooling uses deadpool-postgres. Parameters arrive as JSON values and are
//! bound by their JSON shape: integers as `int8`, other numbers as `float8`,
//! strings as `text`, booleans as `bool`, arrays and objects as `jsonb`.
//! Result columns are converted back to JSON by their Postgres type; cast
//! `numeric` to `float8` in SQL to get it back as a number.

use crate::source::{DataSource, PoolStats, QueryResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use serde_json::Value;
use std::time::Duration;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, Row};
use vista_core::config::{env_or, env_secs};
use vista_core::{VistaError, VistaResult};

/// Lag of the slowest streaming replica as seen by the primary.
const REPLICATION_LAG_SQL: &str =
    "SELECT COALESCE(MAX(EXTRACT(EPOCH FROM replay_lag)), 0)::float8 FROM pg_stat_replication";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Wait for a free connection
    pub timeout: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "vista".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PostgresConfig {
    /// Create a configuration from environment variables under `prefix`.
    ///
    /// With prefix `VISTA_DB` this reads `VISTA_DB_HOST`, `VISTA_DB_PORT`,
    /// `VISTA_DB_NAME`, `VISTA_DB_USER`, `VISTA_DB_PASSWORD`,
    /// `VISTA_DB_POOL_SIZE` and `VISTA_DB_TIMEOUT` (seconds). Replica and
    /// analytics pools use `VISTA_REPLICA_DB` and `VISTA_ANALYTICS_DB`.
    pub fn from_env(prefix: &str) -> Self {
        let defaults = Self::default();
        let var = |name: &str| format!("{}_{}", prefix, name);
        Self {
            host: env_or(&var("HOST"), defaults.host),
            port: env_or(&var("PORT"), defaults.port),
            dbname: env_or(&var("NAME"), defaults.dbname),
            user: env_or(&var("USER"), defaults.user),
            password: env_or(&var("PASSWORD"), defaults.password),
            max_size: env_or(&var("POOL_SIZE"), defaults.max_size),
            timeout: env_secs(&var("TIMEOUT"), defaults.timeout),
        }
    }

    /// True when `{prefix}_HOST` is set, i.e. the pool is wanted at all.
    pub fn is_configured(prefix: &str) -> bool {
        std::env::var(format!("{}_HOST", prefix)).is_ok()
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> VistaResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| VistaError::backend(format!("postgres://{}", self.host), e))
    }
}

// ============================================================================
// DATA SOURCE
// ============================================================================

/// A pooled Postgres server acting as primary, replica or analytics source.
#[derive(Clone)]
pub struct PostgresSource {
    name: String,
    pool: Pool,
}

impl std::fmt::Debug for PostgresSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSource")
            .field("name", &self.name)
            .field("pool", &self.pool.status())
            .finish()
    }
}

type BoundParam = Box<dyn ToSql + Sync + Send>;

fn bind(value: &Value) -> BoundParam {
    match value {
        Value::Null => Box::new(None::<String>),
        Value::Bool(b) => Box::new(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Box::new(i),
            None => Box::new(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Box::new(s.clone()),
        other => Box::new(other.clone()),
    }
}

fn cell<'a, T>(row: &'a Row, idx: usize) -> VistaResult<Value>
where
    T: tokio_postgres::types::FromSql<'a> + serde::Serialize,
{
    let value: Option<T> = row
        .try_get(idx)
        .map_err(|e| VistaError::serialization(format!("column {}", idx), e))?;
    Ok(match value {
        Some(v) => serde_json::to_value(v).unwrap_or(Value::Null),
        None => Value::Null,
    })
}

fn convert_cell(row: &Row, idx: usize, ty: &Type) -> VistaResult<Value> {
    match *ty {
        Type::BOOL => cell::<bool>(row, idx),
        Type::INT2 => cell::<i16>(row, idx),
        Type::INT4 => cell::<i32>(row, idx),
        Type::INT8 => cell::<i64>(row, idx),
        Type::FLOAT4 => cell::<f32>(row, idx),
        Type::FLOAT8 => cell::<f64>(row, idx),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => cell::<String>(row, idx),
        Type::JSON | Type::JSONB => cell::<Value>(row, idx),
        Type::UUID => cell::<uuid::Uuid>(row, idx),
        Type::TIMESTAMPTZ => cell::<chrono::DateTime<chrono::Utc>>(row, idx),
        Type::TIMESTAMP => cell::<chrono::NaiveDateTime>(row, idx),
        Type::DATE => cell::<chrono::NaiveDate>(row, idx),
        _ => {
            tracing::debug!(column = idx, pg_type = %ty, "Unsupported column type, returning null");
            Ok(Value::Null)
        }
    }
}

impl PostgresSource {
    pub fn new(name: impl Into<String>, pool: Pool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn from_config(name: impl Into<String>, config: &PostgresConfig) -> VistaResult<Self> {
        Ok(Self::new(name, config.create_pool()?))
    }

    async fn conn(&self) -> VistaResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| VistaError::backend(self.name.as_str(), e))
    }
}

#[async_trait]
impl DataSource for PostgresSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query(&self, sql: &str, params: &[Value]) -> VistaResult<QueryResult> {
        let conn = self.conn().await?;
        let bound: Vec<BoundParam> = params.iter().map(bind).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let statement = conn
            .prepare_cached(sql)
            .await
            .map_err(|e| VistaError::backend(self.name.as_str(), e))?;
        let rows = conn
            .query(&statement, &refs)
            .await
            .map_err(|e| VistaError::backend(self.name.as_str(), e))?;

        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let column_types: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.type_().name().to_string())
            .collect();

        let mut converted = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut values = Vec::with_capacity(columns.len());
            for (idx, column) in statement.columns().iter().enumerate() {
                values.push(convert_cell(row, idx, column.type_())?);
            }
            converted.push(values);
        }
        Ok(QueryResult::new(columns, column_types, converted))
    }

    async fn probe(&self) -> VistaResult<()> {
        let conn = self.conn().await?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| VistaError::backend(self.name.as_str(), e))?;
        Ok(())
    }

    async fn replication_lag_seconds(&self) -> VistaResult<f64> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(REPLICATION_LAG_SQL, &[])
            .await
            .map_err(|e| VistaError::backend(self.name.as_str(), e))?;
        row.try_get::<_, f64>(0)
            .map_err(|e| VistaError::serialization("replication lag", e))
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        let status = self.pool.status();
        Some(PoolStats {
            size: status.size,
            busy: status.size.saturating_sub(status.available),
            available: status.available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_defaults() {
        let config = PostgresConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
        assert!(!PostgresConfig::is_configured("VISTA_TEST_UNSET_DB"));
    }

    #[test]
    fn test_bind_shapes() {
        // Binding never panics, whatever the JSON shape.
        for value in [json!(null), json!(true), json!(7), json!(2.5), json!("x"), json!({"a": 1})] {
            let _ = bind(&value);
        }
    }
}
