use thiserror::Error;

/// Error type for tier store operations.
#[derive(Error, Debug)]
pub enum TierError {
    /// The metric index has no record in this tier's log.
    #[error("Invalid metric index {index} for tier {tier} (size={size})")]
    InvalidIndex { tier: String, index: u64, size: u64 },

    /// A byte access fell outside the record's reserved size.
    #[error("Out of range access on record {index}: offset={offset}, len={len}, record_size={record_size}")]
    OutOfRange {
        index: u64,
        offset: usize,
        len: usize,
        record_size: usize,
    },

    /// The timestamp's period cannot be represented as an `i64` start.
    #[error("Timestamp {timestamp_ms} has no representable period in tier {tier}")]
    InvalidTimestamp { tier: String, timestamp_ms: i64 },

    /// A decoded record violates a structural invariant. The record is left untouched.
    #[error("Internal consistency violation in tier {tier}, record {index}: {details}")]
    InternalConsistency {
        tier: String,
        index: u64,
        details: String,
    },

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corruption detected: {details}")]
    Corruption {
        details: String,
        path: Option<String>,
    },

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),
}

impl TierError {
    /// Errors after which the caller may log, skip the sample and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TierError::InvalidIndex { .. }
                | TierError::OutOfRange { .. }
                | TierError::InvalidTimestamp { .. }
        )
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for TierError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TierError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TierError>;
