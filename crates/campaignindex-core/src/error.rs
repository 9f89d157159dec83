//! Error types for the campaignindex pipeline.

use thiserror::Error;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node refused the block range (too wide or too many results).
    /// Not a failure: the scanner shrinks its window and retries.
    #[error("Range {from}..={to} rejected by node: {message}")]
    RangeTooLarge { from: u64, to: u64, message: String },

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Trade at {block}:{log_index} applied after {last_block}:{last_log_index} in the same bucket")]
    OutOfOrder {
        block: u64,
        log_index: u32,
        last_block: u64,
        last_log_index: u32,
    },

    #[error("Indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the error is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Timeout { .. } | Self::RateLimited(_)
        )
    }

    /// Returns `true` if the node rejected the requested block range.
    pub fn is_range_too_large(&self) -> bool {
        matches!(self, Self::RangeTooLarge { .. })
    }
}

/// Failure to turn a recognised log into a domain event.
///
/// These never abort a batch; the offending log is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing topic[{index}]")]
    MissingTopic { index: usize },

    #[error("invalid hex in {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("data too short: expected {expected} bytes, got {actual}")]
    ShortData { expected: usize, actual: usize },

    #[error("{field} does not fit in 128 bits")]
    AmountOverflow { field: &'static str },

    #[error("{field} is zero")]
    ZeroAmount { field: &'static str },
}

/// Realtime hub failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("hub unavailable: {0}")]
    Unavailable(String),

    #[error("unknown or expired subscribe token")]
    InvalidToken,

    #[error("token is not valid for channel {0}")]
    WrongChannel(String),

    #[error("payload serialisation failed: {0}")]
    Payload(String),
}
