//! Strong type definitions for the engine boundary.
//!
//! Every engine object is addressed through the same opaque [`Handle`]; a
//! "null" handle is represented as `Option<Handle>::None`.

use std::fmt;
use std::num::NonZeroU64;

use crate::error::ErrorKind;

/// An opaque handle to an engine-owned object (store, session, scan,
/// result list, or key).
///
/// Handles carry no meaning on the client side; they are only ever passed
/// back to the engine that issued them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(NonZeroU64);

impl Handle {
    /// Create a handle from a raw value. Returns `None` for zero (the null handle).
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Get the raw value.
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token passed to the engine and echoed back in its completion.
pub type CallbackId = i64;

/// The numeric status returned by every engine entry point.
///
/// `0` always means success; any other value is one of the
/// [`ErrorKind`] codes and must be followed by a query of the engine's
/// current error before any other engine call is made on the same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    /// The success status.
    pub const SUCCESS: Self = Self(0);

    /// Whether this status denotes success.
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// The error kind denoted by this status.
    pub fn kind(self) -> ErrorKind {
        ErrorKind::from_code(i64::from(self.0))
    }
}

impl From<ErrorKind> for StatusCode {
    fn from(kind: ErrorKind) -> Self {
        Self(i32::try_from(kind.code()).unwrap_or(i32::MAX))
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The value carried by a completion callback, one variant per return-type family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// No return value.
    None,
    /// A boolean (byte) result.
    Flag(bool),
    /// A string result.
    Text(String),
    /// A 64-bit count.
    Count(i64),
    /// An opaque handle; `None` when the engine returns the null handle
    /// (for example an exhausted scan or a fetch that matched nothing).
    Handle(Option<Handle>),
}

impl Payload {
    /// Short name of the payload family, used in mismatch diagnostics.
    pub fn family(&self) -> &'static str {
        match self {
            Payload::None => "none",
            Payload::Flag(_) => "flag",
            Payload::Text(_) => "text",
            Payload::Count(_) => "count",
            Payload::Handle(_) => "handle",
        }
    }
}

/// Conversion from a completion [`Payload`] into the typed result a caller awaits.
///
/// Returns `Err(payload)` when the payload belongs to another family.
pub trait FromPayload: Sized + Send + 'static {
    /// Expected payload family name.
    const FAMILY: &'static str;

    /// Convert the payload.
    fn from_payload(payload: Payload) -> Result<Self, Payload>;
}

impl FromPayload for () {
    const FAMILY: &'static str = "none";

    fn from_payload(payload: Payload) -> Result<Self, Payload> {
        match payload {
            Payload::None => Ok(()),
            other => Err(other),
        }
    }
}

impl FromPayload for bool {
    const FAMILY: &'static str = "flag";

    fn from_payload(payload: Payload) -> Result<Self, Payload> {
        match payload {
            Payload::Flag(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl FromPayload for i64 {
    const FAMILY: &'static str = "count";

    fn from_payload(payload: Payload) -> Result<Self, Payload> {
        match payload {
            Payload::Count(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl FromPayload for String {
    const FAMILY: &'static str = "text";

    fn from_payload(payload: Payload) -> Result<Self, Payload> {
        match payload {
            Payload::Text(v) => Ok(v),
            other => Err(other),
        }
    }
}

impl FromPayload for Option<Handle> {
    const FAMILY: &'static str = "handle";

    fn from_payload(payload: Payload) -> Result<Self, Payload> {
        match payload {
            Payload::Handle(v) => Ok(v),
            other => Err(other),
        }
    }
}

/// A non-null handle. A null handle is treated as a family mismatch, since
/// the callers awaiting `Handle` rely on the engine always producing one.
impl FromPayload for Handle {
    const FAMILY: &'static str = "handle";

    fn from_payload(payload: Payload) -> Result<Self, Payload> {
        match payload {
            Payload::Handle(Some(h)) => Ok(h),
            other => Err(other),
        }
    }
}
