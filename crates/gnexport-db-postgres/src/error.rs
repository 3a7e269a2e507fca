//! Error types for the PostgreSQL backend.

use std::time::Duration;

use gnexport_core::ExportError;
use sqlx_core::error::Error as SqlxError;

/// PostgreSQL error code for undefined table (42P01).
pub const PG_UNDEFINED_TABLE: &str = "42P01";

/// Checks if a sqlx error has a specific PostgreSQL error code.
pub fn has_pg_error_code(err: &SqlxError, code: &str) -> bool {
    if let SqlxError::Database(db_err) = err {
        db_err.code().as_deref() == Some(code)
    } else {
        false
    }
}

/// Checks if a sqlx error is "undefined table" (42P01).
pub fn is_undefined_table(err: &SqlxError) -> bool {
    has_pg_error_code(err, PG_UNDEFINED_TABLE)
}

/// Errors specific to the PostgreSQL backend.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Connection(#[from] sqlx_core::error::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("query timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error(transparent)]
    Query(#[from] gnexport_search::SqlBuilderError),
}

impl PostgresError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<PostgresError> for ExportError {
    fn from(err: PostgresError) -> Self {
        match err {
            PostgresError::Query(e) => e.into(),
            other => ExportError::with_source("Database query failed", other),
        }
    }
}

/// Result type alias for PostgreSQL operations.
pub type Result<T> = std::result::Result<T, PostgresError>;
