//! Persistence error types
//!
//! Error codes:
//! - STASH_STORAGE_IO_ERROR (ERROR severity)
//! - STASH_STORAGE_WRITE_FAILED (ERROR severity)
//! - STASH_STORAGE_READ_FAILED (ERROR severity)
//! - STASH_DATA_CORRUPTION (FATAL severity)
//! - STASH_INVALID_PERSISTENCE_CONFIG (ERROR severity)

use std::fmt;
use std::io;

use crate::observability::Severity;

/// Persistence-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceErrorCode {
    /// Backend initialization or integrity repair failed
    StorageIoError,
    /// Append or rewrite failed
    StorageWriteFailed,
    /// Stream could not be read
    StorageReadFailed,
    /// Corrupted line rate above the configured threshold
    DataCorruption,
    /// Serialization hooks or threshold rejected
    InvalidConfiguration,
}

impl PersistenceErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            PersistenceErrorCode::StorageIoError => "STASH_STORAGE_IO_ERROR",
            PersistenceErrorCode::StorageWriteFailed => "STASH_STORAGE_WRITE_FAILED",
            PersistenceErrorCode::StorageReadFailed => "STASH_STORAGE_READ_FAILED",
            PersistenceErrorCode::DataCorruption => "STASH_DATA_CORRUPTION",
            PersistenceErrorCode::InvalidConfiguration => "STASH_INVALID_PERSISTENCE_CONFIG",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            PersistenceErrorCode::DataCorruption => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for PersistenceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Persistence error type with full context
#[derive(Debug)]
pub struct PersistenceError {
    /// Error code
    code: PersistenceErrorCode,
    /// Human-readable message
    message: String,
    /// Optional details about the error context
    details: Option<String>,
    /// Underlying IO error if applicable
    source: Option<io::Error>,
}

impl PersistenceError {
    /// Backend setup or repair failed
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: PersistenceErrorCode::StorageIoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Append or rewrite failed
    pub fn write_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: PersistenceErrorCode::StorageWriteFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Stream read failed
    pub fn read_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: PersistenceErrorCode::StorageReadFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Too many corrupted lines
    pub fn data_corruption(corrupt: usize, total: usize, threshold: f64) -> Self {
        let rate = if total == 0 {
            0.0
        } else {
            corrupt as f64 / total as f64
        };
        Self {
            code: PersistenceErrorCode::DataCorruption,
            message: format!(
                "{:.1}% of the data file is corrupt, more than the tolerated {:.1}%",
                rate * 100.0,
                threshold * 100.0
            ),
            details: Some(format!("corrupt_lines={} total_lines={}", corrupt, total)),
            source: None,
        }
    }

    /// Rejected configuration
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self {
            code: PersistenceErrorCode::InvalidConfiguration,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Add context details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Returns the error code
    pub fn code(&self) -> PersistenceErrorCode {
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

    /// Returns the details if present
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns true for the corruption-threshold failure
    pub fn is_corruption(&self) -> bool {
        self.code == PersistenceErrorCode::DataCorruption
    }

    /// Returns whether this is a fatal error
    pub fn is_fatal(&self) -> bool {
        self.code.severity() == Severity::Fatal
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code.severity(), self.code.code(), self.message)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for persistence operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(PersistenceErrorCode::StorageIoError.code(), "STASH_STORAGE_IO_ERROR");
        assert_eq!(PersistenceErrorCode::DataCorruption.code(), "STASH_DATA_CORRUPTION");
    }

    #[test]
    fn test_corruption_is_fatal() {
        let err = PersistenceError::data_corruption(3, 10, 0.1);
        assert!(err.is_fatal());
        assert!(err.is_corruption());
        let display = format!("{}", err);
        assert!(display.contains("30.0%"));
        assert!(display.contains("corrupt_lines=3"));
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error;
        let err = PersistenceError::write_failed(
            "append failed",
            io::Error::new(io::ErrorKind::Other, "disk full"),
        );
        assert!(!err.is_fatal());
        assert!(err.source().is_some());
    }
}
