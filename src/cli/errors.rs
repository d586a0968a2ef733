//! CLI error types
//!
//! Every failure is printed as a coded JSON envelope and ends the process
//! with a status derived from its code, so scripts can tell a damaged data
//! file from a typo in a query.

use std::fmt;
use std::io;

use crate::datastore::{DatastoreError, ErrorKind};

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Options file or data file argument error
    ConfigError,
    /// Malformed argument such as a query
    InvalidArgument,
    /// Writing the response or starting the runtime failed
    IoError,
    /// The datastore rejected the query, update or document
    Rejected,
    /// The data file is damaged beyond the tolerated share
    CorruptData,
    /// The data file could not be read or written
    StorageError,
}

impl CliErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "STASH_CLI_CONFIG_ERROR",
            Self::InvalidArgument => "STASH_CLI_INVALID_ARGUMENT",
            Self::IoError => "STASH_CLI_IO_ERROR",
            Self::Rejected => "STASH_CLI_REJECTED",
            Self::CorruptData => "STASH_CLI_CORRUPT_DATA",
            Self::StorageError => "STASH_CLI_STORAGE_ERROR",
        }
    }

    /// Process exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError | Self::InvalidArgument => 2,
            Self::Rejected => 3,
            Self::CorruptData => 4,
            Self::StorageError | Self::IoError => 5,
        }
    }
}

impl From<ErrorKind> for CliErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Corruption => Self::CorruptData,
            ErrorKind::Storage | ErrorKind::TaskAborted => Self::StorageError,
            ErrorKind::Validation | ErrorKind::UniquenessViolation | ErrorKind::Comparison => {
                Self::Rejected
            }
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Error with an explicit code
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Options could not be assembled
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// An argument did not parse
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::InvalidArgument, msg)
    }

    /// Output or runtime failure
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        self.code.exit_code()
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("Failed to encode response: {}", e))
    }
}

impl From<DatastoreError> for CliError {
    fn from(e: DatastoreError) -> Self {
        Self::new(e.kind().into(), e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::PersistenceError;
    use crate::query::QueryError;

    #[test]
    fn test_datastore_errors_map_by_kind() {
        let rejected = CliError::from(DatastoreError::from(QueryError::invalid_query("bad")));
        assert_eq!(rejected.code(), CliErrorCode::Rejected);

        let corrupt = CliError::from(DatastoreError::from(PersistenceError::data_corruption(5, 10, 0.1)));
        assert_eq!(corrupt.code(), CliErrorCode::CorruptData);
        assert_eq!(corrupt.exit_code(), 4);
    }

    #[test]
    fn test_exit_codes_are_nonzero() {
        for code in [
            CliErrorCode::ConfigError,
            CliErrorCode::InvalidArgument,
            CliErrorCode::IoError,
            CliErrorCode::Rejected,
            CliErrorCode::CorruptData,
            CliErrorCode::StorageError,
        ] {
            assert_ne!(code.exit_code(), 0);
            assert!(code.code().starts_with("STASH_CLI_"));
        }
    }
}
