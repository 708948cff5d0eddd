//! Database error types
//!
//! This module provides error types for storage-layer operations.

use thiserror::Error;

/// Storage-related errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Migration checksum mismatch for version {version}: expected {expected}, found {found}")]
    ChecksumMismatch {
        version: i64,
        expected: String,
        found: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl From<redis::RedisError> for DatabaseError {
    fn from(err: redis::RedisError) -> Self {
        DatabaseError::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

/// Type alias for storage results
pub type DatabaseResult<T> = Result<T, DatabaseError>;
