//! Error types for the broadcast engine.

use crate::filter::FilterFailure;
use crate::types::BroadcasterId;
use thiserror::Error;

/// Main error type for broadcaster operations.
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A filter failed during the canonical fold. Nothing was cached or delivered.
    #[error(transparent)]
    FilterFailure(#[from] FilterFailure),

    #[error("Cache write failed on broadcaster {broadcaster}: {source}")]
    CacheWrite {
        broadcaster: BroadcasterId,
        #[source]
        source: CacheError,
    },

    #[error("Broadcaster destroyed: {0}")]
    Destroyed(BroadcasterId),

    #[error("Delivery dispatcher is shut down")]
    DispatcherClosed,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for HeraldError {
    fn from(e: serde_json::Error) -> Self {
        HeraldError::Serialization(e.to_string())
    }
}

/// Error raised by a filter implementation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct FilterError(String);

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        FilterError(message.into())
    }
}

/// Error raised by a sink when it refuses a message for one subscriber.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SinkError(String);

impl SinkError {
    pub fn new(message: impl Into<String>) -> Self {
        SinkError(message.into())
    }
}

/// Error raised by a replay cache that cannot store an envelope.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Out of order append: {got:?} after {last:?}")]
    OutOfOrder {
        last: crate::types::Sequence,
        got: crate::types::Sequence,
    },

    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Result type for broadcaster operations.
pub type Result<T> = std::result::Result<T, HeraldError>;
