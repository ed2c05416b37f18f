//! Error types for shell and store operations.

use std::io;
use thiserror::Error;

/// Result type alias for common operations.
pub type CoinCommonResult<T> = Result<T, CoinCommonError>;

/// Errors that can occur in shell or store operations.
#[derive(Debug, Error)]
pub enum CoinCommonError {
    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// State store operation failed.
    #[error("Store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed (e.g., "get", "set", "connect").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Stored value did not (de)serialize.
    #[error("Store value for '{key}' is malformed: {source}")]
    Serialization {
        /// The key whose value was rejected.
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CoinCommonError {
    /// Creates a store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoinCommonError::Store { .. } | CoinCommonError::ShellCommandFailed { .. }
        )
    }
}
