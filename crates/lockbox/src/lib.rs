//! # Lockbox
//!
//! Client for an encrypted record store driven through a callback-based
//! engine.
//!
//! ## Overview
//!
//! - **Stores**: provisioned or opened from a URI, closed explicitly
//! - **Sessions**: read and write records and keys; a transaction commits or
//!   rolls back on close
//! - **Scans**: page through one category of a store
//! - **Result lists**: engine-held snapshots read synchronously by index
//!
//! Every asynchronous engine call is correlated with its completion by a
//! token; the awaiting task suspends until the engine's worker delivers it.
//!
//! ## Lifecycle rules
//!
//! - A closed store rejects every operation without calling the engine.
//! - A store has at most one started session at a time.
//! - A session closes once, by commit or by rollback.
//! - No value releases engine resources on drop; close and free explicitly.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lockbox::{Client, ClientConfig, KeyMethod, Store};
//!
//! # async fn example() -> lockbox::Result<()> {
//! let client = Client::embedded(ClientConfig::default())?;
//! let store = Store::provision(&client, "sqlite://:memory:", KeyMethod::None, None, None, false).await?;
//!
//! let session = store.start_session(None, false).await?;
//! session.insert("people", "alice", b"{}", Some(r#"{"team":"blue"}"#), None).await?;
//! let count = session.count("people", Some(r#"{"team":"blue"}"#)).await?;
//! assert_eq!(count, 1);
//! session.close_and_commit().await?;
//!
//! store.close(true).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Re-exports
//!
//! - `lockbox::core` - the engine boundary and shared types
//! - `lockbox::bridge` - the correlation bridge
//! - `lockbox::engine` - the embedded SQLite engine

pub mod client;
pub mod error;
pub mod key;
pub mod results;
pub mod scan;
pub mod session;
pub mod store;

// Re-export component crates
pub use lockbox_bridge as bridge;
pub use lockbox_core as core;
pub use lockbox_engine as engine;

// Re-export main types for convenience
pub use client::{Client, ClientConfig};
pub use error::{Error, Result};
pub use key::LocalKey;
pub use results::{Entry, EntryList, KeyEntryList};
pub use scan::Scan;
pub use session::Session;
pub use store::Store;

// Re-export commonly used core types
pub use lockbox_core::{
    log_level, ErrorKind, ErrorReport, Handle, KeyAlg, KeyMethod, LogRecord, LogSink,
    ScanParams, UpdateOperation,
};
