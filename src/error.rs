//! Error types for window counter operations.

use thiserror::Error;

/// Main error type for counter operations.
#[derive(Error, Debug)]
pub enum CounterError {
    /// A required argument was missing or invalid. Raised before any store access.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The backing store failed. The underlying error is carried unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised by a backing store binding.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Redis connection or script failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Relational store connection or procedure failure
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Failed to encode the auxiliary key payload
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store answered with something that is not a count
    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for counter operations.
pub type Result<T> = std::result::Result<T, CounterError>;
