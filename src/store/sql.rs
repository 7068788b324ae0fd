//! Transactional store binding over Postgres.
//!
//! Persisted layout: one row per counter key in the counters table with the
//! key, value and expiry timestamp. Rows are only ever written through the
//! increment function in `sql/increment_counter.sql`. Postgres has no native
//! row TTL, so expired rows are restarted by the function and removed by
//! [`CounterStore::purge_expired`], usually driven by a
//! [`Sweeper`](super::Sweeper).

use async_trait::async_trait;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{CounterError, StoreError};
use crate::ratelimit::CounterStore;

/// Default name of the increment function.
pub const DEFAULT_PROCEDURE: &str = "increment_counter";
/// Default name of the counters table.
pub const DEFAULT_TABLE: &str = "rate_limit_counters";
/// Schema creating the default table and function.
pub const SCHEMA: &str = include_str!("../../sql/increment_counter.sql");

/// Auxiliary key payload stored alongside each counter row.
#[derive(Debug, Serialize)]
struct CounterItem<'a> {
    key: CounterItemKey<'a>,
    timeout: f64,
    delta: f64,
}

#[derive(Debug, Serialize)]
struct CounterItemKey<'a> {
    counter_id: &'a str,
}

/// Serialize the auxiliary key payload passed to the increment function.
fn counter_item_json(
    counter_id: &str,
    timeout_secs: f64,
    delta: f64,
) -> Result<String, StoreError> {
    let item = CounterItem {
        key: CounterItemKey { counter_id },
        timeout: timeout_secs,
        delta,
    };
    Ok(serde_json::to_string(&item)?)
}

/// Reject names that cannot be spliced into SQL as identifiers.
fn validate_identifier(name: &str) -> crate::error::Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid {
        return Err(CounterError::Config(format!(
            "invalid SQL identifier '{}'",
            name
        )));
    }
    Ok(())
}

/// Open a pool of at most `max_connections` connections to `url`.
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;
    info!(max_connections = max_connections, "Connected Postgres counter store");
    Ok(pool)
}

/// Counter store backed by a Postgres connection pool.
///
/// Every increment acquires one pooled connection and returns it when the
/// call ends, whether it succeeds, fails or is dropped mid-flight.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: PgPool,
    increment_sql: String,
    purge_sql: String,
}

impl SqlStore {
    /// Create a store using the default function and table names.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            increment_sql: format!("SELECT {}($1, $2, $3, $4)", DEFAULT_PROCEDURE),
            purge_sql: format!("DELETE FROM {} WHERE expires_at <= now()", DEFAULT_TABLE),
        }
    }

    /// Create a store calling a custom function against a custom table.
    pub fn with_names(pool: PgPool, procedure: &str, table: &str) -> crate::error::Result<Self> {
        validate_identifier(procedure)?;
        validate_identifier(table)?;

        Ok(Self {
            pool,
            increment_sql: format!("SELECT {}($1, $2, $3, $4)", procedure),
            purge_sql: format!("DELETE FROM {} WHERE expires_at <= now()", table),
        })
    }

    /// Connect to `url` with the default function and table names.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        Ok(Self::new(connect_pool(url, max_connections).await?))
    }

    /// Create the default table and increment function if missing.
    pub async fn install_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CounterStore for SqlStore {
    async fn increment(
        &self,
        key: &str,
        delta: f64,
        timeout: Duration,
    ) -> Result<f64, StoreError> {
        let timeout_secs = timeout.as_secs_f64();
        let payload = counter_item_json(key, timeout_secs, delta)?;

        debug!(
            key = %key,
            payload = %payload,
            timeout_secs = timeout_secs,
            delta = delta,
            "Calling increment procedure"
        );

        let result: Result<f64, sqlx::Error> = async {
            let mut connection = self.pool.acquire().await?;
            sqlx::query_scalar::<_, f64>(&self.increment_sql)
                .bind(key)
                .bind(&payload)
                .bind(timeout_secs)
                .bind(delta)
                .fetch_one(&mut *connection)
                .await
        }
        .await;

        result.map_err(|e| {
            error!(
                key = %key,
                timeout_secs = timeout_secs,
                delta = delta,
                error = %e,
                "Error while incrementing counter"
            );
            StoreError::Sql(e)
        })
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(&self.purge_sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    fn store_type(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_item_json() {
        let json = counter_item_json("abc", 60.0, 1.5).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["key"]["counter_id"], "abc");
        assert_eq!(value["timeout"], 60.0);
        assert_eq!(value["delta"], 1.5);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("increment_counter").is_ok());
        assert!(validate_identifier("ratelimit.counters").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("counters; DROP TABLE x").is_err());
    }

    #[test]
    fn test_schema_defines_defaults() {
        assert!(SCHEMA.contains(DEFAULT_TABLE));
        assert!(SCHEMA.contains(DEFAULT_PROCEDURE));
    }

    #[tokio::test]
    async fn test_with_names_rejects_bad_identifier() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();

        assert!(SqlStore::with_names(pool.clone(), "increment_counter", "counters").is_ok());
        assert!(matches!(
            SqlStore::with_names(pool, "f()--", "counters"),
            Err(CounterError::Config(_))
        ));
    }
}
