//! Unified error hierarchy for hrrs
//!
//! Per-session input problems are recoverable (the session is skipped and
//! the batch continues); configuration and sink errors are fatal to the run.

use thiserror::Error;

use crate::database::DatabaseError;

/// Top-level error type for all hrrs operations
#[derive(Debug, Error)]
pub enum HrrError {
    /// Malformed session input
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Result-sink errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration errors, fatal at startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Problems with one session's sample stream
///
/// These never abort a batch: the session is logged, counted, and marked
/// failed while the run continues.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session has no samples
    #[error("Session {session_id} has no samples")]
    Empty { session_id: String },

    /// Sample offsets are not strictly increasing
    #[error("Session {session_id} is not monotonic at sample {index}")]
    NonMonotonic { session_id: String, index: usize },

    /// A sample value is outside the plausible range
    #[error("Session {session_id} has a malformed sample at {index}: {reason}")]
    Malformed {
        session_id: String,
        index: usize,
        reason: String,
    },
}

/// Result type alias for hrrs operations
pub type Result<T> = std::result::Result<T, HrrError>;

impl HrrError {
    /// Error severity for logging
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            HrrError::Session(_) => ErrorSeverity::Warning,
            HrrError::Database(DatabaseError::NotFound(_)) => ErrorSeverity::Warning,
            HrrError::Database(_) => ErrorSeverity::Error,
            HrrError::Configuration(_) => ErrorSeverity::Critical,
            HrrError::Io(_) => ErrorSeverity::Error,
            HrrError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// True when the error only skips a session rather than ending the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, HrrError::Session(_))
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
        }
    }
}
