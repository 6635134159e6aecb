//! Unified error types for the GSE ecosystem
//!
//! This module provides a common error type [`GseError`] that can represent
//! errors from any part of the system. Domain-specific error types (such as
//! the solver's typed errors) convert into `GseError` for uniform handling
//! at API boundaries.

use thiserror::Error;

/// Unified error type for all GSE operations.
#[derive(Error, Debug)]
pub enum GseError {
    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Solver/algorithm errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Network structure errors
    #[error("Network error: {0}")]
    Network(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GseError.
pub type GseResult<T> = Result<T, GseError>;

impl From<anyhow::Error> for GseError {
    fn from(err: anyhow::Error) -> Self {
        GseError::Other(err.to_string())
    }
}

impl From<String> for GseError {
    fn from(s: String) -> Self {
        GseError::Other(s)
    }
}

impl From<&str> for GseError {
    fn from(s: &str) -> Self {
        GseError::Other(s.to_string())
    }
}
