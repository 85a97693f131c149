//! Error types for pgdao

use thiserror::Error;

/// Result type alias for pgdao operations
pub type DaoResult<T> = Result<T, DaoError>;

/// Error types for query construction and execution
#[derive(Debug, Error)]
pub enum DaoError {
    /// Backend execution error, passed through verbatim
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// A join was requested without any ON condition
    #[error("Empty condition: {0}")]
    EmptyCondition(String),

    /// Malformed clause composition (bad identifier, invalid fragment)
    #[error("Invalid query construction: {0}")]
    Invalid(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl DaoError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an invalid-construction error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is the empty-condition construction error
    pub fn is_empty_condition(&self) -> bool {
        matches!(self, Self::EmptyCondition(_))
    }
}

/// A construction error carried on a builder until the next finisher.
///
/// Unlike [`DaoError`] this is `Clone`, so forked builder chains each carry
/// their own copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    EmptyCondition(String),
    Invalid(String),
}

impl From<ChainError> for DaoError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::EmptyCondition(msg) => DaoError::EmptyCondition(msg),
            ChainError::Invalid(msg) => DaoError::Invalid(msg),
        }
    }
}
