//! Error types for the client.

use lockbox_bridge::BridgeError;
use lockbox_core::{Engine, ErrorKind, ErrorReport, StatusCode};
use thiserror::Error;

/// Errors surfaced by client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The engine reported a failure.
    #[error("'{kind}' error occurred with ErrorCode '{code}' : {message}.", code = .kind.code())]
    Engine { kind: ErrorKind, message: String },

    /// A lifecycle rule was violated; no engine call was made.
    #[error("'Wrapper' error occurred with ErrorCode '99' : {0}.")]
    Lifecycle(String),

    /// The engine's error report could not be interpreted.
    #[error("An unknown error code was received.")]
    UnknownErrorCode,

    /// The correlation machinery failed, for example on a call timeout.
    #[error("'Unexpected' error occurred with ErrorCode '7' : {0}.")]
    Bridge(#[from] BridgeError),
}

impl Error {
    /// The kind of this error, for programmatic matching.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Engine { kind, .. } => *kind,
            Self::Lifecycle(_) => ErrorKind::Wrapper,
            Self::UnknownErrorCode => ErrorKind::Unknown(-1),
            Self::Bridge(_) => ErrorKind::Unexpected,
        }
    }

    /// The numeric code of [`Self::kind`].
    pub fn code(&self) -> i64 {
        self.kind().code()
    }

    /// The bare message, without the kind and code prefix.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Engine { message, .. } | Self::Lifecycle(message) => Some(message),
            Self::UnknownErrorCode | Self::Bridge(_) => None,
        }
    }

    pub(crate) fn lifecycle(message: &str) -> Self {
        Self::Lifecycle(message.to_owned())
    }

    /// Convert an error report into a typed failure.
    ///
    /// `status` is the status the engine returned; it supplies the kind when
    /// the report itself claims success.
    pub fn from_report(report: ErrorReport, status: StatusCode) -> Self {
        let kind = match report.code {
            ErrorKind::Success => status.kind(),
            kind => kind,
        };
        Self::Engine {
            kind,
            message: report.message.unwrap_or_default(),
        }
    }

    /// Read the engine's current error after `status` was returned.
    ///
    /// Must be called on the thread that observed `status`.
    pub(crate) fn from_engine(engine: &dyn Engine, status: StatusCode) -> Self {
        match ErrorReport::parse(&engine.current_error()) {
            Ok(report) => Self::from_report(report, status),
            Err(_) => Self::UnknownErrorCode,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = Error::Engine {
            kind: ErrorKind::NotFound,
            message: "Record not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "'NotFound' error occurred with ErrorCode '6' : Record not found."
        );
        assert_eq!(err.code(), 6);
    }

    #[test]
    fn test_lifecycle_display() {
        let err = Error::lifecycle("Cannot count from closed session");
        assert_eq!(
            err.to_string(),
            "'Wrapper' error occurred with ErrorCode '99' : Cannot count from closed session."
        );
        assert_eq!(err.kind(), ErrorKind::Wrapper);
        assert_eq!(err.message(), Some("Cannot count from closed session"));
    }

    #[test]
    fn test_unknown_code_display() {
        assert_eq!(
            Error::UnknownErrorCode.to_string(),
            "An unknown error code was received."
        );
        assert_eq!(Error::UnknownErrorCode.kind(), ErrorKind::Unknown(-1));
    }

    #[test]
    fn test_report_conversion() {
        let report = ErrorReport::parse(r#"{"code":"3","message":"Duplicate entry"}"#).unwrap();
        let err = Error::from_report(report, StatusCode(3));
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(err.message(), Some("Duplicate entry"));

        // An integer code outside the known set keeps its value.
        let report = ErrorReport::parse(r#"{"code":42,"message":"odd"}"#).unwrap();
        assert_eq!(
            Error::from_report(report, StatusCode(42)).to_string(),
            "'Unknown error code' error occurred with ErrorCode '42' : odd."
        );

        // A success report behind a failed status falls back to the status.
        let err = Error::from_report(ErrorReport::success(), StatusCode(2));
        assert_eq!(err.kind(), ErrorKind::Busy);
    }

    #[test]
    fn test_bridge_error_kind() {
        let err = Error::from(BridgeError::UnknownToken(7));
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(err.message().is_none());
        assert_eq!(
            err.to_string(),
            "'Unexpected' error occurred with ErrorCode '7' : no waiter registered for token 7."
        );
    }
}
