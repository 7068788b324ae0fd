//! Periodic eviction of expired counters.
//!
//! Stores without native per-entry expiry keep expired rows until something
//! deletes them. The sweeper calls [`CounterStore::purge_expired`] on a fixed
//! interval until its shutdown signal resolves.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::error::{CounterError, Result, StoreError};
use crate::ratelimit::CounterStore;

/// Background task that purges expired counters.
pub struct Sweeper<S> {
    store: S,
    interval: Duration,
}

impl<S: CounterStore> Sweeper<S> {
    /// Create a sweeper running every `interval`.
    pub fn new(store: S, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(CounterError::Validation(
                "sweep interval must be positive".to_string(),
            ));
        }
        Ok(Self { store, interval })
    }

    /// Create a sweeper from configuration. Fails when the sweeper is
    /// switched off so the caller never runs a task the operator disabled.
    pub fn from_config(store: S, config: &SweeperConfig) -> Result<Self> {
        if !config.enabled {
            return Err(CounterError::Config(
                "expiry sweeper is disabled (sweeper.enabled = false)".to_string(),
            ));
        }
        Self::new(store, config.interval())
    }

    /// Run one purge pass.
    pub async fn sweep_once(&self) -> std::result::Result<u64, StoreError> {
        let removed = self.store.purge_expired().await?;
        if removed > 0 {
            debug!(
                store = self.store.store_type(),
                removed = removed,
                "Purged expired counters"
            );
        }
        Ok(removed)
    }

    /// Sweep until `shutdown` resolves. Failed passes are logged and retried
    /// on the next tick.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            store = self.store.store_type(),
            interval_secs = self.interval.as_secs_f64(),
            "Starting expiry sweeper"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!(
                            store = self.store.store_type(),
                            error = %e,
                            "Expiry sweep failed"
                        );
                    }
                }
            }
        }

        info!(store = self.store.store_type(), "Expiry sweeper stopped");
    }
}
