//! Unified error type for the whole crate.
//!
//! Core functions return [`Result`], the HTTP layer maps each variant onto a
//! status code in [`crate::api::error`].

use crate::provider::UpstreamError;
use thiserror::Error;

/// Every failure the service can report.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Input rejected before any state was touched
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// A referenced row does not exist (or is not visible to the caller)
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record ("item", "user", ...)
        entity: &'static str,
        /// Identifier the caller supplied
        id: String,
    },

    /// The caller is known but may not perform this action
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Why access was denied
        message: String,
    },

    /// The caller could not be identified or credentials were wrong
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Why identification failed
        message: String,
    },

    /// A uniqueness rule would be violated
    #[error("Conflict: {message}")]
    Conflict {
        /// Which rule was violated
        message: String,
    },

    /// A tree move that would break the hierarchy
    #[error("Invalid move: {message}")]
    InvalidMove {
        /// Why the move was rejected
        message: String,
    },

    /// The user's balance does not allow another billed call
    #[error("Insufficient points: balance is {balance}")]
    InsufficientPoints {
        /// Current point balance
        balance: i64,
    },

    /// Invitation code unknown, exhausted or expired
    #[error("Invalid invitation code: {code}")]
    InvalidInvitation {
        /// The code that was presented
        code: String,
    },

    /// The upstream AI service failed
    #[error("Upstream AI service error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Database error from `SeaORM`
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Password hashing failed
    #[error("Password hashing error: {message}")]
    PasswordHash {
        /// Error reported by the hasher
        message: String,
    },
}

impl Error {
    /// Shorthand for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Conflict`].
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
