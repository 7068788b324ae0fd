//! Window counter protocol and the request-shaped types around it.

mod backend;
mod identity;
mod processor;
mod rules;
mod window;

pub use backend::CounterStore;
pub use identity::{
    build_counter_key, ClientIdKeyBuilder, ClientIpKeyBuilder, ClientRequestIdentity,
    CounterKeyBuilder, EndpointKeyBuilder,
};
pub use processor::{
    constant_incrementer, RateIncrementer, RateIncrementerFn, WindowCounter, DEFAULT_INCREMENT,
};
pub use rules::{parse_period, RateLimitOptions, RateLimitRule, DEFAULT_COUNTER_PREFIX};
pub use window::{
    validate_period, window_start, Clock, ManualClock, RateLimitCounter, SystemClock, TimeWindow,
};
