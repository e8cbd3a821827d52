//! The error surface shared by the engine and the client.
//!
//! The engine reports failures as a numeric status plus a thread-scoped
//! "current error" JSON document of the shape
//! `{"code": "<n>", "message": "<text>"}`. This module defines the typed
//! view of both.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error kinds defined by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    Backend,
    Busy,
    Duplicate,
    Encryption,
    Input,
    NotFound,
    Unexpected,
    Unsupported,
    /// Raised client-side by lifecycle checks; never produced by the engine.
    Wrapper,
    Custom,
    /// Any integer code outside the known set.
    Unknown(i64),
}

impl ErrorKind {
    /// Map a numeric code to its kind.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::Backend,
            2 => Self::Busy,
            3 => Self::Duplicate,
            4 => Self::Encryption,
            5 => Self::Input,
            6 => Self::NotFound,
            7 => Self::Unexpected,
            8 => Self::Unsupported,
            99 => Self::Wrapper,
            100 => Self::Custom,
            other => Self::Unknown(other),
        }
    }

    /// The numeric code of this kind.
    pub fn code(self) -> i64 {
        match self {
            Self::Success => 0,
            Self::Backend => 1,
            Self::Busy => 2,
            Self::Duplicate => 3,
            Self::Encryption => 4,
            Self::Input => 5,
            Self::NotFound => 6,
            Self::Unexpected => 7,
            Self::Unsupported => 8,
            Self::Wrapper => 99,
            Self::Custom => 100,
            Self::Unknown(code) => code,
        }
    }

    /// Stable display name, used in formatted error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Backend => "Backend",
            Self::Busy => "Busy",
            Self::Duplicate => "Duplicate",
            Self::Encryption => "Encryption",
            Self::Input => "Input",
            Self::NotFound => "NotFound",
            Self::Unexpected => "Unexpected",
            Self::Unsupported => "Unsupported",
            Self::Wrapper => "Wrapper",
            Self::Custom => "Custom",
            Self::Unknown(_) => "Unknown error code",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while interpreting engine error state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// The error payload was not valid JSON of the expected shape.
    #[error("malformed error report: {0}")]
    MalformedReport(String),

    /// The error payload carried a code that is not an integer.
    #[error("non-integer error code: {0}")]
    NonIntegerCode(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The engine's last-error state: a kind and an optional message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: ErrorKind,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct RawReport {
    code: Value,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct WireReport<'a> {
    code: String,
    message: Option<&'a str>,
}

impl ErrorReport {
    /// A report for the given kind and message.
    pub fn new(code: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }

    /// The report describing "no error".
    pub fn success() -> Self {
        Self {
            code: ErrorKind::Success,
            message: None,
        }
    }

    /// Parse the engine's JSON error document.
    ///
    /// The code may be encoded as a JSON string or number. A code that is not
    /// an integer is reported as [`CoreError::NonIntegerCode`] so callers can
    /// degrade to a generic failure instead of surfacing a parse error.
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawReport =
            serde_json::from_str(json).map_err(|e| CoreError::MalformedReport(e.to_string()))?;

        let code = match &raw.code {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| CoreError::NonIntegerCode(n.to_string()))?,
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| CoreError::NonIntegerCode(s.clone()))?,
            other => return Err(CoreError::NonIntegerCode(other.to_string())),
        };

        Ok(Self {
            code: ErrorKind::from_code(code),
            message: raw.message,
        })
    }

    /// Encode as the engine's JSON error document.
    pub fn to_json(&self) -> String {
        let wire = WireReport {
            code: self.code.code().to_string(),
            message: self.message.as_deref(),
        };
        // Serializing a struct of strings cannot fail.
        serde_json::to_string(&wire).unwrap_or_else(|_| String::from("{\"code\":\"7\"}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_code_roundtrip_known_kinds() {
        for code in [0, 1, 2, 3, 4, 5, 6, 7, 8, 99, 100] {
            let kind = ErrorKind::from_code(code);
            assert!(!matches!(kind, ErrorKind::Unknown(_)));
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn test_unknown_code() {
        let kind = ErrorKind::from_code(999);
        assert_eq!(kind, ErrorKind::Unknown(999));
        assert_eq!(kind.as_str(), "Unknown error code");
        assert_eq!(kind.code(), 999);
    }

    #[test]
    fn test_parse_string_code() {
        let report = ErrorReport::parse(r#"{"code":"5","message":"bad input"}"#).unwrap();
        assert_eq!(report.code, ErrorKind::Input);
        assert_eq!(report.message.as_deref(), Some("bad input"));
    }

    #[test]
    fn test_parse_numeric_code_without_message() {
        let report = ErrorReport::parse(r#"{"code":6}"#).unwrap();
        assert_eq!(report.code, ErrorKind::NotFound);
        assert_eq!(report.message, None);
    }

    #[test]
    fn test_parse_non_integer_code() {
        let err = ErrorReport::parse(r#"{"code":"xyz","message":"no message"}"#).unwrap_err();
        assert_eq!(err, CoreError::NonIntegerCode("xyz".into()));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            ErrorReport::parse("not json"),
            Err(CoreError::MalformedReport(_))
        ));
    }

    #[test]
    fn test_json_roundtrip() {
        let report = ErrorReport::new(ErrorKind::Duplicate, "record exists");
        let parsed = ErrorReport::parse(&report.to_json()).unwrap();
        assert_eq!(parsed, report);

        let success = ErrorReport::success();
        assert_eq!(ErrorReport::parse(&success.to_json()).unwrap(), success);
    }

    proptest! {
        #[test]
        fn test_any_code_survives_a_report(code in any::<i64>(), message in "[ -~]{0,40}") {
            let json = format!(r#"{{"code":"{}","message":{}}}"#, code, serde_json::to_string(&message).unwrap());
            let report = ErrorReport::parse(&json).unwrap();
            prop_assert_eq!(report.code.code(), code);
            prop_assert_eq!(report.message.as_deref(), Some(message.as_str()));
        }
    }
}
