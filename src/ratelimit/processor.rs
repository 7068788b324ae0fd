//! The window counter protocol.
//!
//! Computes the current window from the wall clock and a period, then hands
//! the atomic increment to a [`CounterStore`]. No state is shared between
//! calls in this process; all serialization of concurrent increments to the
//! same key happens inside the store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::backend::CounterStore;
use super::identity::{build_counter_key, ClientRequestIdentity, CounterKeyBuilder};
use super::rules::{RateLimitOptions, RateLimitRule};
use super::window::{self, Clock, RateLimitCounter, SystemClock};
use crate::error::{CounterError, Result};

/// Increment applied when no rate incrementer is supplied.
pub const DEFAULT_INCREMENT: f64 = 1.0;

/// Function returning the weight of one request.
pub type RateIncrementerFn = dyn Fn() -> f64 + Send + Sync;

/// Shared handle to a rate incrementer strategy.
pub type RateIncrementer = Arc<RateIncrementerFn>;

/// A rate incrementer that always returns the same weight.
pub fn constant_incrementer(weight: f64) -> RateIncrementer {
    Arc::new(move || weight)
}

/// Window-bucketed counter over a pluggable store.
pub struct WindowCounter<S> {
    /// The backing store performing the atomic increment
    store: S,
    /// Wall clock used to label windows
    clock: Arc<dyn Clock>,
    /// Default weight strategy for `process_request`
    rate_incrementer: Option<RateIncrementer>,
}

impl<S: CounterStore> WindowCounter<S> {
    /// Create a new counter over `store` using the system clock.
    pub fn new(store: S) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            rate_incrementer: None,
        }
    }

    /// Replace the clock used for window alignment.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the rate incrementer applied by `process_request`.
    pub fn with_rate_incrementer(mut self, rate_incrementer: RateIncrementer) -> Self {
        self.rate_incrementer = Some(rate_incrementer);
        self
    }

    /// Get the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Atomically bump the counter for `key` in the window containing now.
    ///
    /// The increment amount comes from `rate_incrementer`, or is
    /// [`DEFAULT_INCREMENT`] when none is given. Store failures are logged by
    /// the binding and returned unchanged; there is no retry.
    pub async fn increment(
        &self,
        key: &str,
        period: Duration,
        rate_incrementer: Option<&RateIncrementerFn>,
    ) -> Result<RateLimitCounter> {
        if key.is_empty() {
            return Err(CounterError::Validation("counter key is empty".to_string()));
        }

        let now = self.clock.now();
        let window_start = window::window_start(now, period)?;

        let delta = rate_incrementer.map_or(DEFAULT_INCREMENT, |f| f());
        if !delta.is_finite() {
            return Err(CounterError::Validation(format!(
                "increment amount must be finite, got {}",
                delta
            )));
        }

        trace!(
            key = %key,
            delta = delta,
            timeout_secs = period.as_secs_f64(),
            window_start = %window_start,
            store = self.store.store_type(),
            "Incrementing window counter"
        );

        let count = self.store.increment(key, delta, period).await?;

        Ok(RateLimitCounter {
            count,
            window_start,
        })
    }

    /// Count one request from `identity` against `rule`.
    ///
    /// Arguments are validated before the store is touched. The store round
    /// trip races `cancel`; if `cancel` has already resolved no increment is
    /// attempted. Cancellation mid-flight is best effort: the store may or may
    /// not have applied the increment.
    pub async fn process_request<F>(
        &self,
        identity: &ClientRequestIdentity,
        rule: &RateLimitRule,
        key_builder: &dyn CounterKeyBuilder,
        options: &RateLimitOptions,
        cancel: F,
    ) -> Result<RateLimitCounter>
    where
        F: Future<Output = ()>,
    {
        let period = rule.period_duration().inspect_err(|e| {
            warn!(period = %rule.period, error = %e, "Rejected rate limit rule");
        })?;

        let counter_id = build_counter_key(identity, rule, key_builder, options)
            .inspect_err(|e| warn!(error = %e, "Rejected request identity"))?;

        debug!(
            counter_id = %counter_id,
            period_secs = period.as_secs_f64(),
            limit = rule.limit,
            "Processing rate limit request"
        );

        tokio::select! {
            biased;
            _ = cancel => {
                warn!(counter_id = %counter_id, "Rate limit request cancelled");
                Err(CounterError::Cancelled)
            }
            result = self.increment(
                &counter_id,
                period,
                self.rate_incrementer.as_deref(),
            ) => result,
        }
    }
}
