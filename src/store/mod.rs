//! Counter store bindings.
//!
//! - [`MemoryStore`]: in-process, for a single instance or tests
//! - [`RedisStore`]: shared, atomic via a server-side script, self-expiring
//! - [`SqlStore`]: shared, atomic via a stored function, swept for expiry

pub mod memory;
pub mod redis;
pub mod sql;
mod sweeper;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use sql::SqlStore;
pub use sweeper::Sweeper;

use std::sync::Arc;
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::ratelimit::CounterStore;

/// Build the store described by `config`.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CounterStore>> {
    let store: Arc<dyn CounterStore> = match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Redis { url } => Arc::new(RedisStore::connect(url).await?),
        StoreConfig::Postgres {
            url,
            max_connections,
            procedure,
            table,
        } => {
            let pool = sql::connect_pool(url, *max_connections).await?;
            Arc::new(SqlStore::with_names(pool, procedure, table)?)
        }
    };

    info!(store = store.store_type(), "Counter store ready");
    Ok(store)
}
