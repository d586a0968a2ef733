//! Index error types
//!
//! Error codes:
//! - STASH_UNIQUE_VIOLATED (ERROR)
//! - STASH_COMPARISON_FAILED (ERROR)
//! - STASH_INVALID_INDEX (ERROR)

use std::fmt;

use crate::observability::Severity;

/// Index-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorCode {
    /// Key already present in a unique index
    UniqueViolated,
    /// Keys of incomparable kinds met in the tree
    ComparisonFailed,
    /// Index definition is malformed
    InvalidIndex,
}

impl IndexErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            IndexErrorCode::UniqueViolated => "STASH_UNIQUE_VIOLATED",
            IndexErrorCode::ComparisonFailed => "STASH_COMPARISON_FAILED",
            IndexErrorCode::InvalidIndex => "STASH_INVALID_INDEX",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Error
    }
}

impl fmt::Display for IndexErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Index error type with full context
#[derive(Debug, Clone)]
pub struct IndexError {
    /// Error code
    code: IndexErrorCode,
    /// Human-readable message
    message: String,
    /// Offending key, rendered
    key: Option<String>,
    /// Field name of the index, once known
    field_name: Option<String>,
}

impl IndexError {
    /// Create a uniqueness violation for a rendered key
    pub fn unique_violated(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            code: IndexErrorCode::UniqueViolated,
            message: format!("Can't insert key {}, it violates the unique constraint", key),
            key: Some(key),
            field_name: None,
        }
    }

    /// Create a comparison failure
    pub fn comparison_failed(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::ComparisonFailed,
            message: reason.into(),
            key: None,
            field_name: None,
        }
    }

    /// Create an invalid index definition error
    pub fn invalid_index(reason: impl Into<String>) -> Self {
        Self {
            code: IndexErrorCode::InvalidIndex,
            message: reason.into(),
            key: None,
            field_name: None,
        }
    }

    /// Attach the index field name
    pub fn with_field(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> IndexErrorCode {
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

    /// Returns the offending key if applicable
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Returns the index field name if known
    pub fn field_name(&self) -> Option<&str> {
        self.field_name.as_deref()
    }

    /// Returns true for uniqueness violations
    pub fn is_unique_violation(&self) -> bool {
        self.code == IndexErrorCode::UniqueViolated
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)?;
        if let Some(field) = &self.field_name {
            write!(f, " (index on {})", field)?;
        }
        Ok(())
    }
}

impl std::error::Error for IndexError {}

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;
