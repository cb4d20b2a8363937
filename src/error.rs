//! Error taxonomy for the backfill pipeline
//!
//! Every stage of a chunk reports a typed error so the scheduler can decide what
//! to do with it. Today every variant is fatal for the owning scan; the
//! transient/permanent split on [`AdapterError`] is what a bounded retry would
//! key off.

use alloy::primitives::B256;
use thiserror::Error;

/// Failure reported by an [`EventSource`](crate::source::EventSource)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Network-level failure that may succeed if repeated (timeouts, rate limits)
    #[error("transient RPC failure during {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },
    /// Failure that will not go away on its own (bad response, missing header)
    #[error("RPC failure during {operation}: {message}")]
    Permanent {
        operation: &'static str,
        message: String,
    },
}

impl AdapterError {
    /// Build an error for `operation`, classifying it from the error text
    pub fn classify(operation: &'static str, error: impl ToString) -> Self {
        let message = error.to_string();
        match classify_error(&message) {
            ErrorClass::Transient => AdapterError::Transient { operation, message },
            ErrorClass::Permanent => AdapterError::Permanent { operation, message },
        }
    }

    /// A permanent error that does not come from the transport
    pub fn permanent(operation: &'static str, message: impl Into<String>) -> Self {
        AdapterError::Permanent {
            operation,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient { .. })
    }
}

/// Coarse classification of RPC errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues)
    Transient,
    /// Anything else
    Permanent,
}

/// Classify an RPC error message
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("timed out")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("429")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
    {
        return ErrorClass::Transient;
    }

    ErrorClass::Permanent
}

/// A log that could not be turned into a deposit event
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid number of topics: got {got}, want {expected}")]
    TopicCount { expected: usize, got: usize },

    #[error("unexpected event signature {0}")]
    UnexpectedSignature(B256),

    #[error("failed to unpack log data: {0}")]
    Decode(String),

    #[error("amount {0} wei has no finite ETH value")]
    Amount(String),
}

/// Storage failure
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to run database migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The guarded link update found the row already matched or missing
    #[error("{table} row {id} is already matched or does not exist")]
    LinkConflict { table: &'static str, id: i64 },
}

/// Error that aborts a backfill scan
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("failed to parse log {tx_hash}:{log_index} in block {block_number}: {source}")]
    Parse {
        block_number: u64,
        tx_hash: B256,
        log_index: u64,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to serialize raw log: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<sqlx::Error> for ScanError {
    fn from(err: sqlx::Error) -> Self {
        ScanError::Store(StoreError::Sqlx(err))
    }
}

impl ScanError {
    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            ScanError::Adapter(e) if e.is_transient() => "rpc_transient",
            ScanError::Adapter(_) => "rpc",
            ScanError::Parse { .. } => "parse",
            ScanError::Store(_) => "storage",
            ScanError::Serialize(_) => "serialize",
        }
    }
}
