//! Window Counter - window-bucketed atomic counters for distributed rate limiting
//!
//! This crate implements the counter increment used to enforce rate limits
//! across processes sharing a backing store. Each increment is aligned to a
//! fixed window derived from the wall clock, applied atomically inside the
//! store, and given an expiry once so stale windows clean themselves up.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;
