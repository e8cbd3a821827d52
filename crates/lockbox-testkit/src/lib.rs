//! # Lockbox Testkit
//!
//! Testing utilities for the Lockbox client.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Counting engine**: An engine wrapper that counts calls and can hold
//!   completions back, for lifecycle and timeout tests
//! - **Generators**: Proptest strategies for records and tags
//! - **Fixtures**: A client with a provisioned in-memory store, and
//!   temporary directories for file-backed stores
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use lockbox_testkit::TestFixture;
//!
//! # async fn example() -> lockbox::Result<()> {
//! let fixture = TestFixture::new().await?;
//! fixture.seed("people", "alice", b"{}", r#"{"team":"blue"}"#).await?;
//!
//! fixture.store.close(false).await?;
//! assert_eq!(fixture.engine.calls("store_close"), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use lockbox_testkit::RecordParams;
//!
//! proptest! {
//!     #[test]
//!     fn record_tags_are_json(params: RecordParams) {
//!         prop_assert!(serde_json::from_str::<serde_json::Value>(&params.tags_json()).is_ok());
//!     }
//! }
//! ```

pub mod counting;
pub mod fixtures;
pub mod generators;

pub use counting::CountingEngine;
pub use fixtures::{counting_client, FileStoreDir, TestFixture, MEMORY_URI};
pub use generators::{encode_tags, RecordParams};

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}
