//! Error types for seqkv.
//!
//! This module defines all error types that can occur during storage operations.

use thiserror::Error;

/// Result type alias for seqkv operations.
///
/// This is a convenience alias for `Result<T, StorageError>`.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Error types for storage operations.
///
/// Bounds and decode errors indicate a programming bug or corrupted data and
/// are never retried internally. I/O errors are propagated to the caller of
/// the append/commit path.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the operating system.
    ///
    /// This includes failures growing, mapping, syncing or truncating the log file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Byte access outside of a view.
    #[error("Index {index} out of bounds for view of length {len}")]
    OutOfBounds {
        /// Requested index
        index: usize,
        /// Length of the view
        len: usize,
    },

    /// Sub-range outside of a view.
    #[error("Range [{start}, {start}+{len}) out of bounds for view of length {available}")]
    InvalidRange {
        /// Requested start offset
        start: usize,
        /// Requested length
        len: usize,
        /// Length of the view
        available: usize,
    },

    /// Stored key bytes do not follow the internal key layout.
    #[error("Malformed internal key: {0}")]
    MalformedKey(String),

    /// User key does not fit into the 32-bit length prefix.
    #[error("User key of {len} bytes exceeds maximum of {max} bytes")]
    KeyTooLarge {
        /// Length of the rejected key
        len: usize,
        /// Maximum encodable key length
        max: usize,
    },

    /// Attempt to encode the decode-only `Unknown` value type.
    #[error("Value type cannot be encoded")]
    UnencodableValueType,

    /// The 56-bit sequence space is exhausted.
    ///
    /// This is the only condition treated as fatal for the engine: no further
    /// writes are accepted once it occurs.
    #[error("Sequence number space exhausted")]
    SequenceExhausted,

    /// Checksum verification failed.
    ///
    /// This error indicates that data integrity check failed, suggesting
    /// data corruption or torn writes.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// Expected checksum value
        expected: u32,
        /// Actual checksum value computed from data
        actual: u32,
    },

    /// A log record could not be decoded.
    #[error("Corrupted record at offset {offset}: {reason}")]
    CorruptedRecord {
        /// Byte offset of the record in the log or payload
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Payload does not fit into a single log record.
    #[error("Record of {len} bytes is too large for the log")]
    RecordTooLarge {
        /// Payload length
        len: usize,
    },

    /// The group this write was folded into failed to apply.
    ///
    /// Carries the leader's error message; the leader itself receives the
    /// original error.
    #[error("Group commit failed: {0}")]
    GroupCommitFailed(String),

    /// A lock was poisoned by a panicking thread.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// The engine or sink has been closed.
    #[error("Storage is closed")]
    Closed,

    /// Configuration validation failed.
    ///
    /// This error occurs when invalid configuration parameters are provided.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A background task or worker thread failed.
    #[error("Background task failed: {0}")]
    BackgroundTask(String),

    /// JSON parsing or serialization failed.
    ///
    /// This error occurs when reading or writing configuration files.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
