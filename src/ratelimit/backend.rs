//! Store trait for abstracting the backing store of window counters.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// A shared store that can atomically bump a counter.
///
/// Implementations must perform the whole of [`CounterStore::increment`] as
/// one indivisible operation on the store side: concurrent callers in other
/// processes must never observe an intermediate state or lose an update.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `delta` to the value at `key` and return the post-increment value.
    ///
    /// If the entry has no expiry yet, it is set to expire `timeout` from now.
    /// An existing expiry is never refreshed.
    async fn increment(&self, key: &str, delta: f64, timeout: Duration)
        -> Result<f64, StoreError>;

    /// Remove entries whose expiry has passed, returning how many were removed.
    ///
    /// Stores with native per-entry expiry have nothing to do here.
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }

    /// Short store name for logging.
    fn store_type(&self) -> &'static str;
}

#[async_trait]
impl<S: CounterStore + ?Sized> CounterStore for std::sync::Arc<S> {
    async fn increment(
        &self,
        key: &str,
        delta: f64,
        timeout: Duration,
    ) -> Result<f64, StoreError> {
        (**self).increment(key, delta, timeout).await
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        (**self).purge_expired().await
    }

    fn store_type(&self) -> &'static str {
        (**self).store_type()
    }
}
