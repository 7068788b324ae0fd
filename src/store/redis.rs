//! Script-capable key-value store binding.
//!
//! Persisted layout: one string entry per counter key holding the numeric
//! value, with a TTL in milliseconds equal to the period. The TTL is applied
//! only when the entry has none, so it is fixed when a window's entry is
//! created and the store evicts it on its own.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::Script;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::ratelimit::CounterStore;

/// Increment, read TTL, and set TTL only when absent, as one server-side step.
///
/// `KEYS[1]` is the counter key, `ARGV[1]` the delta, `ARGV[2]` the timeout
/// in milliseconds. `PTTL` answers -1 for an entry without expiry. The delta
/// is handed to `INCRBYFLOAT` as sent, never through a Lua number.
pub const INCREMENT_SCRIPT: &str = r#"
local count = redis.call("INCRBYFLOAT", KEYS[1], ARGV[1])
local ttl = redis.call("PTTL", KEYS[1])
if ttl == -1 then
    redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return count
"#;

/// Counter store backed by Redis.
///
/// The connection is shared and cheap to clone; each call works on its own
/// clone and never assumes exclusive ownership.
pub struct RedisStore<C = ConnectionManager> {
    connection: C,
    script: Script,
}

impl RedisStore<ConnectionManager> {
    /// Open a managed, reconnecting connection to `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!("Connected Redis counter store");
        Ok(Self::new(connection))
    }
}

impl<C> RedisStore<C> {
    /// Wrap an existing connection handle.
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            script: Script::new(INCREMENT_SCRIPT),
        }
    }
}

/// Largest expire value Redis accepts.
const MAX_EXPIRE_MILLIS: u64 = i64::MAX as u64;

/// Milliseconds for `PEXPIRE`, rounded up, at least one and at most `i64::MAX`.
pub fn expire_millis(timeout: Duration) -> u64 {
    let partial = u128::from(timeout.subsec_nanos() % 1_000_000 > 0);
    let millis = timeout.as_millis().saturating_add(partial);
    u64::try_from(millis)
        .unwrap_or(MAX_EXPIRE_MILLIS)
        .clamp(1, MAX_EXPIRE_MILLIS)
}

/// Parse the value returned by the script.
fn parse_count(key: &str, raw: &str) -> Result<f64, StoreError> {
    raw.trim().parse::<f64>().map_err(|_| {
        StoreError::InvalidResponse(format!("non-numeric count '{}' for key {}", raw, key))
    })
}

#[async_trait]
impl<C> CounterStore for RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync + 'static,
{
    async fn increment(
        &self,
        key: &str,
        delta: f64,
        timeout: Duration,
    ) -> Result<f64, StoreError> {
        let timeout_ms = expire_millis(timeout);

        debug!(
            key = %key,
            timeout_ms = timeout_ms,
            delta = delta,
            "Calling increment script"
        );

        let mut connection = self.connection.clone();
        let result: redis::RedisResult<String> = self
            .script
            .key(key)
            .arg(delta)
            .arg(timeout_ms)
            .invoke_async(&mut connection)
            .await;

        result
            .map_err(StoreError::Redis)
            .and_then(|raw| parse_count(key, &raw))
            .inspect_err(|e| {
                error!(
                    key = %key,
                    timeout_ms = timeout_ms,
                    delta = delta,
                    error = %e,
                    "Error while incrementing counter"
                );
            })
    }

    fn store_type(&self) -> &'static str {
        "redis"
    }
}
