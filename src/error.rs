//! Error types for sentinelq.

use crate::model::Slot;
use std::time::Duration;
use thiserror::Error;

/// Boxed error a [`Handler`](crate::engine::Handler) returns to stop its loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("delay of less than or equal to zero provided")]
    InvalidDelay,

    #[error("nil queue payload")]
    NilPayload,

    #[error("sentinels were not returned: expected 2 values, got {0}")]
    SentinelsNotReturned(usize),

    #[error("request failed to resolve instructions")]
    RequestFailedToResolve,

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("stored value is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("cache transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("cache responded with status {status}: {body}")]
    CacheStatus { status: u16, body: String },

    #[error("unexpected reply to {command}: {reply}")]
    UnexpectedReply {
        command: &'static str,
        reply: serde_json::Value,
    },

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("no payload stored for slot {0}")]
    PayloadMissing(Slot),

    #[error("queue loop canceled")]
    Canceled,

    #[error("handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when refetching the same slot can never succeed.
    pub fn is_poison(&self) -> bool {
        matches!(self, Error::Serialization(_) | Error::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
