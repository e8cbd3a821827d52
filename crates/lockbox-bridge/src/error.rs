//! Error types for the correlation bridge.

use std::time::Duration;

use lockbox_core::CallbackId;
use thiserror::Error;

/// Failures of the correlation machinery itself, as opposed to failures
/// reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// No completion arrived within the configured timeout. The token has
    /// been abandoned.
    #[error("no completion for token {token} within {after:?}")]
    TimedOut { token: CallbackId, after: Duration },

    /// The waiter's entry was discarded without ever being resolved.
    #[error("completion for token {0} was dropped without a result")]
    Dropped(CallbackId),

    /// The completion carried a payload of the wrong family.
    #[error("completion for token {token} carried a {found} payload, expected {expected}")]
    PayloadMismatch {
        token: CallbackId,
        expected: &'static str,
        found: &'static str,
    },

    /// A completion arrived for a token that is not pending: never issued,
    /// already resolved, or abandoned.
    #[error("no waiter registered for token {0}")]
    UnknownToken(CallbackId),
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
