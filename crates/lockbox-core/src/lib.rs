//! # Lockbox Core
//!
//! Shared vocabulary for the Lockbox client and the engines it drives.
//!
//! This crate contains no I/O and no runtime. It defines the boundary
//! between the control layer and a storage/crypto engine.
//!
//! ## Key Types
//!
//! - [`Handle`] - Opaque reference to an engine-owned object
//! - [`Payload`] - Value carried by an engine completion
//! - [`ErrorKind`] / [`ErrorReport`] - The engine's error surface
//! - [`Engine`] - The call-now, complete-later engine interface
//!
//! ## Options
//!
//! Key methods, update operations and key algorithms cross the boundary in a
//! fixed wire form. See [`options`].

pub mod engine;
pub mod error;
pub mod options;
pub mod types;

pub use engine::{
    CompletionFn, Engine, KeyQuery, KeyRecord, LogRecord, LogSink, RecordUpdate, ScanParams,
    StoreSpec, SyncResult,
};
pub use error::{CoreError, ErrorKind, ErrorReport};
pub use options::{log_level, KeyAlg, KeyMethod, UpdateOperation};
pub use types::{CallbackId, FromPayload, Handle, Payload, StatusCode};
