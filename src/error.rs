//! Crate-wide error types, built with `thiserror`.

use thiserror::Error;

/// Every failure surfaced by the matrix, engine, and registry layers.
#[derive(Error, Debug)]
pub enum TreeBuildError {
    /// Rejected before any work begins: too few taxa, duplicate or empty
    /// names, a names/buffer size mismatch, or a precision below 1.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// No tree builder is registered under the requested name.
    #[error("unknown algorithm '{name}' (available: {available})")]
    UnknownAlgorithm { name: String, available: String },

    /// Failure while opening, writing, flushing, or closing a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An engine invariant was breached mid-run. Fatal to the invocation.
    #[error("internal invariant violated: {message}")]
    InternalInvariant { message: String },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TreeBuildError>;

impl TreeBuildError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalInvariant {
            message: message.into(),
        }
    }
}
