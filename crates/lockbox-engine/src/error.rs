//! Error types for the embedded engine, and the thread-scoped last error.

use std::cell::RefCell;

use lockbox_core::{ErrorKind, ErrorReport, StatusCode};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur inside the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error on a store file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store is locked by another transaction.
    #[error("{0}")]
    Busy(String),

    /// The record, profile or store already exists.
    #[error("{0}")]
    Duplicate(String),

    /// Encryption or decryption failed, including a wrong store key.
    #[error("{0}")]
    Encryption(String),

    /// Invalid argument, handle or index.
    #[error("{0}")]
    Input(String),

    /// The record, profile or store does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Unsupported URI scheme, key method or algorithm.
    #[error("{0}")]
    Unsupported(String),

    /// Stored data could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anything else.
    #[error("{0}")]
    Unexpected(String),
}

impl EngineError {
    /// The kind reported across the engine boundary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Database(err) => match err.sqlite_error_code() {
                Some(ErrorCode::ConstraintViolation) => ErrorKind::Duplicate,
                Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                    ErrorKind::Busy
                }
                _ => ErrorKind::Backend,
            },
            Self::Io(_) => ErrorKind::Backend,
            Self::Busy(_) => ErrorKind::Busy,
            Self::Duplicate(_) => ErrorKind::Duplicate,
            Self::Encryption(_) => ErrorKind::Encryption,
            Self::Input(_) => ErrorKind::Input,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Serialization(_) | Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// The report recorded as the thread's last error.
    pub fn report(&self) -> ErrorReport {
        ErrorReport::new(self.kind(), self.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

thread_local! {
    static LAST_ERROR: RefCell<ErrorReport> = RefCell::new(ErrorReport::success());
}

/// Record `err` as the calling thread's last error and return its status.
pub(crate) fn record(err: &EngineError) -> StatusCode {
    let report = err.report();
    let status = StatusCode::from(report.code);
    LAST_ERROR.with(|slot| *slot.borrow_mut() = report);
    status
}

/// Reset the calling thread's last error.
pub(crate) fn clear() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = ErrorReport::success());
}

/// The calling thread's last error as a JSON document.
pub(crate) fn current_json() -> String {
    LAST_ERROR.with(|slot| slot.borrow().to_json())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_thread_scoped() {
        clear();
        let status = record(&EngineError::NotFound("missing".into()));
        assert_eq!(status, StatusCode(6));

        let here = ErrorReport::parse(&current_json()).unwrap();
        assert_eq!(here, ErrorReport::new(ErrorKind::NotFound, "missing"));

        let elsewhere = std::thread::spawn(current_json).join().unwrap();
        assert_eq!(
            ErrorReport::parse(&elsewhere).unwrap(),
            ErrorReport::success()
        );
    }

    #[test]
    fn test_constraint_violation_is_duplicate() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .unwrap();
        let err: EngineError = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }
}
