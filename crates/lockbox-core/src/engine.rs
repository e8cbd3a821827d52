//! The engine boundary: the narrow call-now, complete-later interface the
//! control layer drives.
//!
//! Every asynchronous entry point takes a [`CompletionFn`] and a
//! [`CallbackId`] and returns a synchronous [`StatusCode`]:
//!
//! - a non-success status means the call was rejected up front; the
//!   completion will never fire and the caller must read
//!   [`Engine::current_error`] before making another engine call;
//! - a success status means the completion fires exactly once, later, on a
//!   thread of the engine's choosing, with `(id, status, payload)`.
//!
//! Synchronous accessors (result-list reads, key inspection) return
//! `Result<T, StatusCode>` and follow the same last-error rule on failure.

use std::sync::Arc;

use bytes::Bytes;

use crate::types::{CallbackId, Handle, Payload, StatusCode};

/// Completion callback handed to asynchronous engine entry points.
pub type CompletionFn = Arc<dyn Fn(CallbackId, StatusCode, Payload) + Send + Sync>;

/// Outcome of a synchronous engine accessor.
pub type SyncResult<T> = std::result::Result<T, StatusCode>;

/// Location and key material used to provision or open a store.
#[derive(Debug, Clone, Copy)]
pub struct StoreSpec<'a> {
    pub uri: &'a str,
    /// Wire form of a [`KeyMethod`](crate::KeyMethod); `None` means the engine default.
    pub key_method: Option<&'a str>,
    pub pass_key: Option<&'a str>,
    pub profile: Option<&'a str>,
}

/// Parameters of a scan, kept verbatim by the client for introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanParams {
    pub profile: Option<String>,
    pub category: String,
    pub tag_filter: Option<String>,
    pub offset: i64,
    /// `-1` means unbounded.
    pub limit: i64,
}

/// One invocation of the record update primitive.
#[derive(Debug, Clone, Copy)]
pub struct RecordUpdate<'a> {
    /// Wire form of an [`UpdateOperation`](crate::UpdateOperation).
    pub operation: u8,
    pub category: &'a str,
    pub name: &'a str,
    pub value: Option<&'a [u8]>,
    pub tags: Option<&'a str>,
    /// `-1` means no expiry.
    pub expiry_ms: i64,
}

/// Name, metadata and tags attached to a stored key.
#[derive(Debug, Clone, Copy)]
pub struct KeyRecord<'a> {
    pub name: &'a str,
    pub metadata: Option<&'a str>,
    pub tags: Option<&'a str>,
    /// `-1` means no expiry.
    pub expiry_ms: i64,
}

/// Filters for fetching stored keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyQuery<'a> {
    pub alg: Option<&'a str>,
    pub thumbprint: Option<&'a str>,
    pub tag_filter: Option<&'a str>,
    /// `-1` means unbounded.
    pub limit: i64,
    pub for_update: bool,
}

/// A single diagnostic record emitted by the engine.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub level: i32,
    pub target: &'a str,
    pub message: &'a str,
    pub module_path: Option<&'a str>,
    pub file: Option<&'a str>,
    pub line: Option<u32>,
}

/// Diagnostic sink the engine may invoke. Configured once per process.
pub trait LogSink: Send + Sync {
    /// Receive one record.
    fn log(&self, record: &LogRecord<'_>);

    /// Whether records at `level` should be produced at all.
    fn enabled(&self, _level: i32) -> bool {
        true
    }

    /// Flush any buffered output.
    fn flush(&self) {}
}

/// The storage/crypto engine driven by the control layer.
pub trait Engine: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Error surface & housekeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// The last error recorded on the calling thread, as a JSON document
    /// `{"code": "<n>", "message": "<text>"}`.
    fn current_error(&self) -> String;

    /// Engine version string.
    fn version(&self) -> String;

    /// Release every engine-owned object.
    fn terminate(&self);

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    fn set_custom_logger(&self, sink: Arc<dyn LogSink>, max_level: i32) -> StatusCode;
    fn clear_custom_logger(&self);
    fn set_default_logger(&self) -> StatusCode;
    fn set_max_log_level(&self, max_level: i32) -> StatusCode;

    // ─────────────────────────────────────────────────────────────────────────
    // Store operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Produce a raw store key, derived from `seed` when given.
    fn store_generate_raw_key(&self, seed: Option<&[u8]>) -> SyncResult<String>;

    /// Completes with `Payload::Handle`.
    fn store_provision(
        &self,
        spec: StoreSpec<'_>,
        recreate: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Handle`.
    fn store_open(&self, spec: StoreSpec<'_>, cb: CompletionFn, cb_id: CallbackId) -> StatusCode;

    /// Completes with `Payload::Flag` (whether anything was removed).
    fn store_remove(&self, uri: &str, cb: CompletionFn, cb_id: CallbackId) -> StatusCode;

    /// Completes with `Payload::Text` (the profile name).
    fn store_create_profile(
        &self,
        store: Handle,
        profile: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Text`.
    fn store_get_profile_name(&self, store: Handle, cb: CompletionFn, cb_id: CallbackId)
        -> StatusCode;

    /// Completes with `Payload::Flag`.
    fn store_remove_profile(
        &self,
        store: Handle,
        profile: &str,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`.
    fn store_rekey(
        &self,
        store: Handle,
        key_method: Option<&str>,
        pass_key: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`.
    fn store_close(&self, store: Handle, cb: CompletionFn, cb_id: CallbackId) -> StatusCode;

    // ─────────────────────────────────────────────────────────────────────────
    // Scan operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Completes with `Payload::Handle` (the scan).
    fn scan_start(
        &self,
        store: Handle,
        params: &ScanParams,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Handle` (an entry list, or null when exhausted).
    fn scan_next(&self, scan: Handle, cb: CompletionFn, cb_id: CallbackId) -> StatusCode;

    fn scan_free(&self, scan: Handle) -> StatusCode;

    // ─────────────────────────────────────────────────────────────────────────
    // Session operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Completes with `Payload::Handle` (the session).
    fn session_start(
        &self,
        store: Handle,
        profile: Option<&str>,
        as_transaction: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Count`.
    fn session_count(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Handle` (an entry list, or null when not found).
    fn session_fetch(
        &self,
        session: Handle,
        category: &str,
        name: &str,
        for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Handle` (an entry list, possibly empty).
    #[allow(clippy::too_many_arguments)]
    fn session_fetch_all(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        limit: i64,
        for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Count` (records removed).
    fn session_remove_all(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`.
    fn session_update(
        &self,
        session: Handle,
        update: RecordUpdate<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`.
    fn session_insert_key(
        &self,
        session: Handle,
        key: Handle,
        record: KeyRecord<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Handle` (a key-entry list, or null when not found).
    fn session_fetch_key(
        &self,
        session: Handle,
        name: &str,
        for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::Handle` (a key-entry list, possibly empty).
    fn session_fetch_all_keys(
        &self,
        session: Handle,
        query: KeyQuery<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`.
    fn session_update_key(
        &self,
        session: Handle,
        record: KeyRecord<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`.
    fn session_remove_key(
        &self,
        session: Handle,
        name: &str,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    /// Completes with `Payload::None`. The session handle is released
    /// whatever the outcome.
    fn session_close(
        &self,
        session: Handle,
        commit: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode;

    // ─────────────────────────────────────────────────────────────────────────
    // Entry lists
    // ─────────────────────────────────────────────────────────────────────────

    fn entry_list_count(&self, list: Handle) -> SyncResult<usize>;
    fn entry_list_get_category(&self, list: Handle, index: usize) -> SyncResult<String>;
    fn entry_list_get_name(&self, list: Handle, index: usize) -> SyncResult<String>;
    fn entry_list_get_value(&self, list: Handle, index: usize) -> SyncResult<Bytes>;
    fn entry_list_get_tags(&self, list: Handle, index: usize) -> SyncResult<String>;
    fn entry_list_free(&self, list: Handle) -> StatusCode;

    // ─────────────────────────────────────────────────────────────────────────
    // Key-entry lists
    // ─────────────────────────────────────────────────────────────────────────

    fn key_entry_list_count(&self, list: Handle) -> SyncResult<usize>;
    fn key_entry_list_get_algorithm(&self, list: Handle, index: usize) -> SyncResult<String>;
    fn key_entry_list_get_name(&self, list: Handle, index: usize) -> SyncResult<String>;
    fn key_entry_list_get_metadata(&self, list: Handle, index: usize)
        -> SyncResult<Option<String>>;
    fn key_entry_list_get_tags(&self, list: Handle, index: usize) -> SyncResult<String>;
    /// Materialize the key at `index` as a new local key handle.
    fn key_entry_list_load_local(&self, list: Handle, index: usize) -> SyncResult<Handle>;
    fn key_entry_list_free(&self, list: Handle) -> StatusCode;

    // ─────────────────────────────────────────────────────────────────────────
    // Local keys (opaque to the control layer)
    // ─────────────────────────────────────────────────────────────────────────

    fn key_generate(&self, alg: &str, ephemeral: bool) -> SyncResult<Handle>;
    fn key_get_algorithm(&self, key: Handle) -> SyncResult<String>;
    fn key_get_public_bytes(&self, key: Handle) -> SyncResult<Bytes>;
    fn key_free(&self, key: Handle) -> StatusCode;
}
