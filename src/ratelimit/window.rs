//! Fixed window alignment and the counter value returned to callers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CounterError, Result};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Named time windows for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    /// Per-second rate limiting
    Second,
    /// Per-minute rate limiting
    Minute,
    /// Per-hour rate limiting
    Hour,
    /// Per-day rate limiting
    Day,
}

impl TimeWindow {
    /// Get the duration of this time window.
    pub fn duration(&self) -> Duration {
        match self {
            TimeWindow::Second => Duration::from_secs(1),
            TimeWindow::Minute => Duration::from_secs(60),
            TimeWindow::Hour => Duration::from_secs(3600),
            TimeWindow::Day => Duration::from_secs(86400),
        }
    }

    /// Map a period suffix (`s`, `m`, `h`, `d`) to its window.
    pub fn from_suffix(suffix: char) -> Option<Self> {
        match suffix {
            's' => Some(TimeWindow::Second),
            'm' => Some(TimeWindow::Minute),
            'h' => Some(TimeWindow::Hour),
            'd' => Some(TimeWindow::Day),
            _ => None,
        }
    }
}

/// The observable result of an increment.
///
/// `count` is the cumulative increment total within the current window. It is
/// a float because increments may be weighted. `window_start` is the inclusive
/// start of the window, as reported by the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitCounter {
    /// Post-increment value stored for the key
    pub count: f64,
    /// Inclusive start of the current fixed window
    pub window_start: DateTime<Utc>,
}

/// Reject periods that would make window math undefined.
pub fn validate_period(period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(CounterError::Validation(
            "period must be a strictly positive duration".to_string(),
        ));
    }
    Ok(())
}

/// Compute `floor(now / period) * period` at nanosecond resolution.
///
/// Windows are aligned to multiples of `period` since the Unix epoch.
pub fn window_start(now: DateTime<Utc>, period: Duration) -> Result<DateTime<Utc>> {
    validate_period(period)?;

    let period_nanos = period.as_nanos() as i128;
    // Leap seconds report up to 1_999_999_999 subsec nanos.
    let subsec = now.timestamp_subsec_nanos().min(999_999_999) as i128;
    let now_nanos = now.timestamp() as i128 * NANOS_PER_SEC + subsec;

    let start = now_nanos.div_euclid(period_nanos) * period_nanos;
    let secs = start.div_euclid(NANOS_PER_SEC) as i64;
    let nanos = start.rem_euclid(NANOS_PER_SEC) as u32;

    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| CounterError::Validation(format!("window start out of range for {}", now)))
}

/// Source of wall-clock time for window alignment.
///
/// Clock drift between machines only affects the reported `window_start`
/// label, never the accumulated count.
pub trait Clock: Send + Sync {
    /// Current UTC wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Useful for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Jump to an absolute instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        if let Ok(delta) = chrono::Duration::from_std(by) {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
