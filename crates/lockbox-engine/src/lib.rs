//! # Lockbox Engine
//!
//! An embedded, SQLite-backed implementation of the [`Engine`] boundary.
//!
//! ## Overview
//!
//! [`EmbeddedEngine`] owns every engine object in handle tables and runs each
//! asynchronous call on a tokio blocking worker, completing through the
//! caller's [`CompletionFn`](lockbox_core::CompletionFn) from that worker.
//! Failures are recorded in a thread-scoped last error, readable with
//! [`Engine::current_error`] on the thread that observed the status.
//!
//! ## Storage
//!
//! - Records and keys live in one `items` table, scoped by profile.
//! - Category and name are indexed by keyed blake3 hashes; every column
//!   holding user data is sealed with ChaCha20-Poly1305 under the profile key.
//! - Profile keys are wrapped by the store key, which comes from the key
//!   method: `none`, `raw` (hex key) or `kdf:argon2i` (passphrase).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lockbox_core::{Engine, StoreSpec};
//! use lockbox_engine::EmbeddedEngine;
//!
//! # async fn example() {
//! let engine = EmbeddedEngine::new();
//! let spec = StoreSpec {
//!     uri: "sqlite://:memory:",
//!     key_method: None,
//!     pass_key: None,
//!     profile: None,
//! };
//! let status = engine.store_provision(spec, false, Arc::new(|_id, _status, _payload| {}), 1);
//! assert!(status.is_success());
//! # }
//! ```

pub mod crypto;
pub mod embedded;
pub mod error;
pub mod filter;
pub mod handles;
pub mod keys;
pub mod logging;
pub mod migration;
pub mod results;
pub mod session;
pub mod sqlite;
pub mod uri;

pub use embedded::EmbeddedEngine;
pub use error::{EngineError, Result};
pub use logging::TracingSink;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch; zero if the clock is before it.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
