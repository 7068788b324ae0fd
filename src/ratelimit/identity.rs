//! Client identity and counter key construction.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::rules::{RateLimitOptions, RateLimitRule};
use crate::error::{CounterError, Result};

/// The identity of the client making a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientRequestIdentity {
    /// Remote address of the client
    #[serde(default)]
    pub client_ip: String,
    /// Client identifier, typically taken from an API key header
    #[serde(default)]
    pub client_id: String,
    /// Request method, lowercase
    #[serde(default)]
    pub http_verb: String,
    /// Request path, lowercase
    #[serde(default)]
    pub path: String,
}

/// Builds the identity part of a counter key for one (client, rule) pair.
pub trait CounterKeyBuilder: Send + Sync {
    /// Produce the key fragment for this identity and rule.
    fn build(&self, identity: &ClientRequestIdentity, rule: &RateLimitRule) -> String;
}

/// Keys counters by client id and rule period.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientIdKeyBuilder;

impl CounterKeyBuilder for ClientIdKeyBuilder {
    fn build(&self, identity: &ClientRequestIdentity, rule: &RateLimitRule) -> String {
        if identity.client_id.is_empty() {
            return String::new();
        }
        format!("{}_{}", identity.client_id, rule.period)
    }
}

/// Keys counters by client address and rule period.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientIpKeyBuilder;

impl CounterKeyBuilder for ClientIpKeyBuilder {
    fn build(&self, identity: &ClientRequestIdentity, rule: &RateLimitRule) -> String {
        if identity.client_ip.is_empty() {
            return String::new();
        }
        format!("{}_{}", identity.client_ip, rule.period)
    }
}

/// Appends the endpoint (verb and path) to a counter key.
#[derive(Debug, Default, Clone, Copy)]
pub struct EndpointKeyBuilder;

impl CounterKeyBuilder for EndpointKeyBuilder {
    fn build(&self, identity: &ClientRequestIdentity, _rule: &RateLimitRule) -> String {
        format!("_{}_{}", identity.http_verb, identity.path)
    }
}

/// Build the opaque storage key for one (client, rule) pair.
///
/// The raw key is `{prefix}_{builder output}`, followed by the endpoint
/// fragment when endpoint rate limiting is enabled, then hashed so that
/// arbitrary client input never reaches the store verbatim.
pub fn build_counter_key(
    identity: &ClientRequestIdentity,
    rule: &RateLimitRule,
    key_builder: &dyn CounterKeyBuilder,
    options: &RateLimitOptions,
) -> Result<String> {
    let fragment = key_builder.build(identity, rule);
    if fragment.is_empty() {
        return Err(CounterError::Validation(
            "counter key builder produced an empty key".to_string(),
        ));
    }

    let mut key = format!("{}_{}", options.rate_limit_counter_prefix, fragment);
    if options.enable_endpoint_rate_limiting {
        key.push_str(&EndpointKeyBuilder.build(identity, rule));
    }

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}
