//! Custom error types for the recorder.
//!
//! `RecorderError` is the single error type shared by the library. It is built with
//! `thiserror` so every variant carries a readable message, and `#[from]` conversions
//! let `?` lift I/O and configuration errors without manual mapping.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: parse errors from figment, and semantic
//!   validation failures caught by `RecorderConfig::validate`.
//! - **`Device`** / **`MalformedBatch`**: transient failures reported by a
//!   `SampleSource`. These are retried by the acquisition loop.
//! - **`AcquisitionFailed`**: the retry budget was exhausted. Surfaced to the
//!   controller as a stop reason, never as a panic across tasks.
//! - **`InvalidSession`** / **`InvalidTransition`**: misuse of the session lifecycle.
//! - **`QueueClosed`**: a push raced the terminal flush.
//! - **`Storage`** / **`Serialization`** / **`PersistenceFailed`**: persistence errors.
//!   Persistence is one-shot; these are reported and never retried.

use thiserror::Error;

/// Convenience alias for results using the recorder error type.
pub type AppResult<T> = std::result::Result<T, RecorderError>;

/// Errors produced by the recorder library.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sample source reported a failure for a single poll.
    #[error("Device error: {0}")]
    Device(String),

    /// A device batch had columns of unequal length.
    #[error("Malformed device batch: {0}")]
    MalformedBatch(String),

    /// Consecutive poll failures exceeded the retry budget.
    #[error("Acquisition failed after {attempts} consecutive attempts: {last_error}")]
    AcquisitionFailed {
        /// Number of consecutive failed polls.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },

    /// Session identifiers were rejected.
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// A lifecycle operation is not allowed in the current state.
    #[error("Cannot {action} while session is {from}")]
    InvalidTransition {
        /// State the session was in.
        from: String,
        /// Operation that was attempted.
        action: &'static str,
    },

    /// The hand-off queue was closed by the terminal flush.
    #[error("Hand-off queue is closed")]
    QueueClosed,

    /// Writing a dataset failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding a dataset or manifest failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A compile-time feature needed for the operation is disabled.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    /// One or more datasets could not be persisted.
    #[error("Persistence failed: {}", .0.join("; "))]
    PersistenceFailed(Vec<String>),
}

impl From<figment::Error> for RecorderError {
    fn from(value: figment::Error) -> Self {
        RecorderError::Config(Box::new(value))
    }
}

#[cfg(feature = "storage_csv")]
impl From<csv::Error> for RecorderError {
    fn from(value: csv::Error) -> Self {
        RecorderError::Storage(value.to_string())
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(value: serde_json::Error) -> Self {
        RecorderError::Serialization(value.to_string())
    }
}
