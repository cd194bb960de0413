//! Error types for PharmaDB.
//!
//! Database failures are carried with the server's message text untouched;
//! the variant only records where the failure came from so the executor can
//! decide whether a retry is allowed.

use std::time::Duration;
use thiserror::Error;

/// Main error type for PharmaDB operations.
#[derive(Error, Debug)]
pub enum PharmaError {
    /// The connection is no longer usable (dropped socket, server gone away, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// No pooled connection became available before the checkout timeout.
    #[error("Timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    /// The pool was shut down before or during checkout.
    #[error("Connection pool is closed")]
    PoolClosed,

    /// Statement errors (syntax errors, constraint violations, type mismatches, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Input rejected before any statement ran (empty order, unknown id, etc.)
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Configuration errors (invalid config file, malformed connection string, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PharmaError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates a validation error with the given message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if the failure says nothing about the statement itself,
    /// only about the connection it ran on.
    ///
    /// Pool exhaustion counts as transient: a connection may free up.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::PoolTimeout(_))
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::PoolTimeout(_) | Self::PoolClosed => "Pool Error",
            Self::Query(_) => "Query Error",
            Self::Validation(_) => "Validation Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using PharmaError.
pub type Result<T> = std::result::Result<T, PharmaError>;
