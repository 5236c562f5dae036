//! Unified error handling for the detection engine.
//!
//! Empty inputs (no points, no places, no candidates) are normal and yield
//! zero-count results, never errors. The only failures the engine itself
//! surfaces are storage failures, which propagate uncaught to the caller;
//! retry policy belongs to the caller.

use thiserror::Error;

/// Errors produced by detection runs.
#[derive(Debug, Error)]
pub enum DetectError {
    /// A storage operation failed. Detection performs no internal retries.
    #[error("storage operation failed: {message}")]
    Storage { message: String },
}

impl DetectError {
    /// Wrap a storage backend's error message.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// Convenience result type for detection operations.
pub type Result<T> = std::result::Result<T, DetectError>;
