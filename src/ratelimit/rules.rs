//! Rate limit rules as handed to the counter by the rule-matching layer.
//!
//! Only the period is consumed here; the limit travels with the rule so the
//! caller can compare it against the returned count.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::window::TimeWindow;
use crate::error::{CounterError, Result};

/// Default prefix prepended to every counter key.
pub const DEFAULT_COUNTER_PREFIX: &str = "crlc";

/// A rate limit rule specifying the limit and time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Endpoint pattern the rule applies to, e.g. `get:/api/values` or `*`
    #[serde(default)]
    pub endpoint: String,
    /// Period shorthand: `1s`, `15m`, `12h`, `7d`
    #[serde(default)]
    pub period: String,
    /// Explicit period, takes precedence over `period` when present
    #[serde(default)]
    pub period_timespan: Option<Duration>,
    /// Maximum count allowed in one window
    pub limit: f64,
    /// Optional name/description for this limit
    #[serde(default)]
    pub name: Option<String>,
}

impl RateLimitRule {
    /// Create a rule from a period shorthand and a limit.
    pub fn new(period: impl Into<String>, limit: f64) -> Self {
        Self {
            endpoint: "*".to_string(),
            period: period.into(),
            period_timespan: None,
            limit,
            name: None,
        }
    }

    /// Create a rule with an explicit period duration.
    pub fn with_timespan(period: Duration, limit: f64) -> Self {
        Self {
            endpoint: "*".to_string(),
            period: String::new(),
            period_timespan: Some(period),
            limit,
            name: None,
        }
    }

    /// Resolve the window length for this rule.
    ///
    /// Fails with a validation error when the period is missing,
    /// unparseable, or not strictly positive.
    pub fn period_duration(&self) -> Result<Duration> {
        let period = match self.period_timespan {
            Some(period) => period,
            None => parse_period(&self.period)?,
        };

        if period.is_zero() {
            return Err(CounterError::Validation(format!(
                "rule period must be positive, got {:?}",
                period
            )));
        }
        Ok(period)
    }
}

/// Parse a period shorthand such as `30s`, `1.5h` or `1d`.
pub fn parse_period(period: &str) -> Result<Duration> {
    let period = period.trim();
    let invalid = || CounterError::Validation(format!("invalid rule period '{}'", period));

    let suffix = period.chars().last().ok_or_else(invalid)?;
    let window = TimeWindow::from_suffix(suffix).ok_or_else(invalid)?;
    let value: f64 = period[..period.len() - suffix.len_utf8()]
        .parse()
        .map_err(|_| invalid())?;

    if !value.is_finite() || value <= 0.0 {
        return Err(invalid());
    }

    Duration::try_from_secs_f64(value * window.duration().as_secs_f64()).map_err(|_| invalid())
}

/// Options that shape how counter keys are built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitOptions {
    /// Prefix prepended to every counter key
    #[serde(default = "default_counter_prefix")]
    pub rate_limit_counter_prefix: String,
    /// Scope counters per endpoint (verb and path) in addition to the client
    #[serde(default)]
    pub enable_endpoint_rate_limiting: bool,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            rate_limit_counter_prefix: default_counter_prefix(),
            enable_endpoint_rate_limiting: false,
        }
    }
}

fn default_counter_prefix() -> String {
    DEFAULT_COUNTER_PREFIX.to_string()
}
