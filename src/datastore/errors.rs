//! # Datastore Errors

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::index::{IndexError, IndexErrorCode};
use crate::persistence::{PersistenceError, PersistenceErrorCode};
use crate::query::QueryError;

/// Result type for datastore operations
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// Coarse failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed query, update, projection, document or option
    Validation,
    /// A unique index would hold the same key twice
    UniquenessViolation,
    /// Data file damaged beyond the tolerated share
    Corruption,
    /// Backend I/O failure
    Storage,
    /// Incomparable values reached an index
    Comparison,
    /// The task died before producing a result
    TaskAborted,
}

/// Datastore errors
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

impl DatastoreError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            DatastoreError::Index(err) => match err.code() {
                IndexErrorCode::UniqueViolated => ErrorKind::UniquenessViolation,
                IndexErrorCode::ComparisonFailed => ErrorKind::Comparison,
                IndexErrorCode::InvalidIndex => ErrorKind::Validation,
            },
            DatastoreError::Query(_) => ErrorKind::Validation,
            DatastoreError::Persistence(err) => match err.code() {
                PersistenceErrorCode::DataCorruption => ErrorKind::Corruption,
                PersistenceErrorCode::InvalidConfiguration => ErrorKind::Validation,
                PersistenceErrorCode::StorageIoError
                | PersistenceErrorCode::StorageWriteFailed
                | PersistenceErrorCode::StorageReadFailed => ErrorKind::Storage,
            },
            DatastoreError::Executor(_) => ErrorKind::TaskAborted,
            DatastoreError::InvalidOptions(_) => ErrorKind::Validation,
        }
    }

    /// Returns true for a uniqueness violation
    pub fn is_unique_violation(&self) -> bool {
        self.kind() == ErrorKind::UniquenessViolation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        let err: DatastoreError = IndexError::unique_violated("a").into();
        assert!(err.is_unique_violation());
        let err: DatastoreError = QueryError::invalid_query("bad").into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err: DatastoreError = PersistenceError::data_corruption(5, 10, 0.1).into();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        let err: DatastoreError = ExecutorError::task_aborted("gone").into();
        assert_eq!(err.kind(), ErrorKind::TaskAborted);
    }

    #[test]
    fn test_display_is_transparent() {
        let err: DatastoreError = QueryError::invalid_query("bad").into();
        assert!(err.to_string().contains("STASH_INVALID_QUERY"));
    }
}
