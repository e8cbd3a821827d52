//! # Lockbox Bridge
//!
//! Correlation of asynchronous engine completions with the callers awaiting
//! them.
//!
//! A caller registers a waiter, passes the returned token to the engine,
//! and awaits the waiter. The engine's completion callback, running on an
//! arbitrary thread, resolves the token. Completions for different tokens
//! may arrive in any order.
//!
//! ```ignore
//! let (token, waiter) = registry.register::<i64>();
//! engine.session_count(session, "cat", None, callback, token);
//! let count = waiter.wait().await?;
//! ```

pub mod error;
pub mod registry;

pub use error::{BridgeError, Result};
pub use registry::{CallbackRegistry, Waiter};
