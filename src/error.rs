//! Error types shared by the optimization engine and the location layer.
//!
//! Only malformed input and unrecoverable numerical trouble are errors.
//! Infeasible, unbounded and time-limited searches are reported through
//! [`SolveStatus`](crate::math::integer_linear::SolveStatus) instead.

use thiserror::Error;

/// Errors produced while building or solving a model.
#[derive(Debug, Error)]
pub enum Error {
    /// Instance data or model structure is inconsistent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The simplex kernel lost numerical control (singular basis, cycling
    /// guard exhausted, residual check failed).
    #[error("Numeric failure: {0}")]
    Numeric(String),

    /// A request payload could not be decoded.
    #[error("Malformed request: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    pub fn numeric(message: impl Into<String>) -> Self {
        Error::Numeric(message.into())
    }

    /// Whether the caller is at fault (client error) rather than the engine.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::Json(_))
    }
}

/// Result type for every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;
