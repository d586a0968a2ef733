//! Query error types
//!
//! Error codes:
//! - STASH_INVALID_QUERY (ERROR)
//! - STASH_INVALID_UPDATE (ERROR)
//! - STASH_INVALID_DOCUMENT (ERROR)
//! - STASH_INVALID_PROJECTION (ERROR)

use std::fmt;

use crate::observability::Severity;

/// Query-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorCode {
    /// Unknown operator, mixed operators and fields, malformed operand
    InvalidQuery,
    /// Unknown modifier, mixed modifiers, incompatible target type
    InvalidUpdate,
    /// Forbidden field name or `_id` violation
    InvalidDocument,
    /// Inclusion and exclusion mixed in one projection
    InvalidProjection,
}

impl QueryErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            QueryErrorCode::InvalidQuery => "STASH_INVALID_QUERY",
            QueryErrorCode::InvalidUpdate => "STASH_INVALID_UPDATE",
            QueryErrorCode::InvalidDocument => "STASH_INVALID_DOCUMENT",
            QueryErrorCode::InvalidProjection => "STASH_INVALID_PROJECTION",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for QueryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Validation failure raised while matching, modifying or checking documents
#[derive(Debug, Clone)]
pub struct QueryError {
    code: QueryErrorCode,
    message: String,
}

impl QueryError {
    /// Malformed query
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self {
            code: QueryErrorCode::InvalidQuery,
            message: reason.into(),
        }
    }

    /// Malformed update
    pub fn invalid_update(reason: impl Into<String>) -> Self {
        Self {
            code: QueryErrorCode::InvalidUpdate,
            message: reason.into(),
        }
    }

    /// Document violates the key or `_id` rules
    pub fn invalid_document(reason: impl Into<String>) -> Self {
        Self {
            code: QueryErrorCode::InvalidDocument,
            message: reason.into(),
        }
    }

    /// Malformed projection
    pub fn invalid_projection(reason: impl Into<String>) -> Self {
        Self {
            code: QueryErrorCode::InvalidProjection,
            message: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> QueryErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for QueryError {}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(QueryErrorCode::InvalidQuery.code(), "STASH_INVALID_QUERY");
        assert_eq!(QueryErrorCode::InvalidUpdate.code(), "STASH_INVALID_UPDATE");
        assert_eq!(
            QueryErrorCode::InvalidDocument.code(),
            "STASH_INVALID_DOCUMENT"
        );
        assert_eq!(
            QueryErrorCode::InvalidProjection.code(),
            "STASH_INVALID_PROJECTION"
        );
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::invalid_query("Unknown comparison function $foo");
        let display = format!("{}", err);
        assert!(display.contains("STASH_INVALID_QUERY"));
        assert!(display.contains("ERROR"));
        assert!(display.contains("$foo"));
    }
}
