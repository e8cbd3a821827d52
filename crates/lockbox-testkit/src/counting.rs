//! An engine wrapper that counts calls and can hold completions back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use lockbox_core::{
    CallbackId, CompletionFn, Engine, Handle, KeyQuery, KeyRecord, LogSink, Payload,
    RecordUpdate, ScanParams, StatusCode, StoreSpec, SyncResult,
};

type Held = (CompletionFn, CallbackId, StatusCode, Payload);

/// Wraps an engine, recording how often each entry point is called.
///
/// With [`hold_completions`](Self::hold_completions) enabled, successful
/// completions are queued instead of delivered, until
/// [`release_held`](Self::release_held) runs them.
pub struct CountingEngine {
    inner: Arc<dyn Engine>,
    calls: Mutex<HashMap<&'static str, usize>>,
    holding: AtomicBool,
    held: Arc<Mutex<Vec<Held>>>,
}

impl CountingEngine {
    pub fn new(inner: Arc<dyn Engine>) -> Self {
        Self {
            inner,
            calls: Mutex::new(HashMap::new()),
            holding: AtomicBool::new(false),
            held: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of calls made to the entry point `op`.
    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op)
            .copied()
            .unwrap_or(0)
    }

    /// Number of calls made to any entry point.
    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }

    pub fn hold_completions(&self, hold: bool) {
        self.holding.store(hold, Ordering::SeqCst);
    }

    /// Deliver every held completion. Returns how many were delivered.
    pub fn release_held(&self) -> usize {
        let held: Vec<Held> = std::mem::take(&mut *self.held.lock().unwrap_or_else(PoisonError::into_inner));
        let count = held.len();
        for (cb, id, status, payload) in held {
            cb(id, status, payload);
        }
        count
    }

    fn count(&self, op: &'static str) {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(op)
            .or_insert(0) += 1;
    }

    fn wrap(&self, op: &'static str, cb: CompletionFn) -> CompletionFn {
        self.count(op);
        if !self.holding.load(Ordering::SeqCst) {
            return cb;
        }
        let held = Arc::clone(&self.held);
        Arc::new(move |id: CallbackId, status: StatusCode, payload: Payload| {
            if status.is_success() {
                held.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((Arc::clone(&cb), id, status, payload));
            } else {
                cb(id, status, payload);
            }
        })
    }
}

impl Engine for CountingEngine {
    fn current_error(&self) -> String {
        self.inner.current_error()
    }

    fn version(&self) -> String {
        self.count("version");
        self.inner.version()
    }

    fn terminate(&self) {
        self.count("terminate");
        self.inner.terminate()
    }

    fn set_custom_logger(&self, sink: Arc<dyn LogSink>, max_level: i32) -> StatusCode {
        self.count("set_custom_logger");
        self.inner.set_custom_logger(sink, max_level)
    }

    fn clear_custom_logger(&self) {
        self.count("clear_custom_logger");
        self.inner.clear_custom_logger()
    }

    fn set_default_logger(&self) -> StatusCode {
        self.count("set_default_logger");
        self.inner.set_default_logger()
    }

    fn set_max_log_level(&self, max_level: i32) -> StatusCode {
        self.count("set_max_log_level");
        self.inner.set_max_log_level(max_level)
    }

    fn store_generate_raw_key(&self, seed: Option<&[u8]>) -> SyncResult<String> {
        self.count("store_generate_raw_key");
        self.inner.store_generate_raw_key(seed)
    }

    fn store_provision(
        &self,
        spec: StoreSpec<'_>,
        recreate: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("store_provision", cb);
        self.inner.store_provision(spec, recreate, cb, cb_id)
    }

    fn store_open(&self, spec: StoreSpec<'_>, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let cb = self.wrap("store_open", cb);
        self.inner.store_open(spec, cb, cb_id)
    }

    fn store_remove(&self, uri: &str, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let cb = self.wrap("store_remove", cb);
        self.inner.store_remove(uri, cb, cb_id)
    }

    fn store_create_profile(
        &self,
        store: Handle,
        profile: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("store_create_profile", cb);
        self.inner.store_create_profile(store, profile, cb, cb_id)
    }

    fn store_get_profile_name(
        &self,
        store: Handle,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("store_get_profile_name", cb);
        self.inner.store_get_profile_name(store, cb, cb_id)
    }

    fn store_remove_profile(
        &self,
        store: Handle,
        profile: &str,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("store_remove_profile", cb);
        self.inner.store_remove_profile(store, profile, cb, cb_id)
    }

    fn store_rekey(
        &self,
        store: Handle,
        key_method: Option<&str>,
        pass_key: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("store_rekey", cb);
        self.inner.store_rekey(store, key_method, pass_key, cb, cb_id)
    }

    fn store_close(&self, store: Handle, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let cb = self.wrap("store_close", cb);
        self.inner.store_close(store, cb, cb_id)
    }

    fn scan_start(
        &self,
        store: Handle,
        params: &ScanParams,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("scan_start", cb);
        self.inner.scan_start(store, params, cb, cb_id)
    }

    fn scan_next(&self, scan: Handle, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let cb = self.wrap("scan_next", cb);
        self.inner.scan_next(scan, cb, cb_id)
    }

    fn scan_free(&self, scan: Handle) -> StatusCode {
        self.count("scan_free");
        self.inner.scan_free(scan)
    }

    fn session_start(
        &self,
        store: Handle,
        profile: Option<&str>,
        as_transaction: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_start", cb);
        self.inner
            .session_start(store, profile, as_transaction, cb, cb_id)
    }

    fn session_count(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_count", cb);
        self.inner
            .session_count(session, category, tag_filter, cb, cb_id)
    }

    fn session_fetch(
        &self,
        session: Handle,
        category: &str,
        name: &str,
        for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_fetch", cb);
        self.inner
            .session_fetch(session, category, name, for_update, cb, cb_id)
    }

    fn session_fetch_all(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        limit: i64,
        for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_fetch_all", cb);
        self.inner
            .session_fetch_all(session, category, tag_filter, limit, for_update, cb, cb_id)
    }

    fn session_remove_all(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_remove_all", cb);
        self.inner
            .session_remove_all(session, category, tag_filter, cb, cb_id)
    }

    fn session_update(
        &self,
        session: Handle,
        update: RecordUpdate<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_update", cb);
        self.inner.session_update(session, update, cb, cb_id)
    }

    fn session_insert_key(
        &self,
        session: Handle,
        key: Handle,
        record: KeyRecord<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_insert_key", cb);
        self.inner.session_insert_key(session, key, record, cb, cb_id)
    }

    fn session_fetch_key(
        &self,
        session: Handle,
        name: &str,
        for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_fetch_key", cb);
        self.inner
            .session_fetch_key(session, name, for_update, cb, cb_id)
    }

    fn session_fetch_all_keys(
        &self,
        session: Handle,
        query: KeyQuery<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_fetch_all_keys", cb);
        self.inner.session_fetch_all_keys(session, query, cb, cb_id)
    }

    fn session_update_key(
        &self,
        session: Handle,
        record: KeyRecord<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_update_key", cb);
        self.inner.session_update_key(session, record, cb, cb_id)
    }

    fn session_remove_key(
        &self,
        session: Handle,
        name: &str,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_remove_key", cb);
        self.inner.session_remove_key(session, name, cb, cb_id)
    }

    fn session_close(
        &self,
        session: Handle,
        commit: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let cb = self.wrap("session_close", cb);
        self.inner.session_close(session, commit, cb, cb_id)
    }

    fn entry_list_count(&self, list: Handle) -> SyncResult<usize> {
        self.count("entry_list_count");
        self.inner.entry_list_count(list)
    }

    fn entry_list_get_category(&self, list: Handle, index: usize) -> SyncResult<String> {
        self.count("entry_list_get_category");
        self.inner.entry_list_get_category(list, index)
    }

    fn entry_list_get_name(&self, list: Handle, index: usize) -> SyncResult<String> {
        self.count("entry_list_get_name");
        self.inner.entry_list_get_name(list, index)
    }

    fn entry_list_get_value(&self, list: Handle, index: usize) -> SyncResult<Bytes> {
        self.count("entry_list_get_value");
        self.inner.entry_list_get_value(list, index)
    }

    fn entry_list_get_tags(&self, list: Handle, index: usize) -> SyncResult<String> {
        self.count("entry_list_get_tags");
        self.inner.entry_list_get_tags(list, index)
    }

    fn entry_list_free(&self, list: Handle) -> StatusCode {
        self.count("entry_list_free");
        self.inner.entry_list_free(list)
    }

    fn key_entry_list_count(&self, list: Handle) -> SyncResult<usize> {
        self.count("key_entry_list_count");
        self.inner.key_entry_list_count(list)
    }

    fn key_entry_list_get_algorithm(&self, list: Handle, index: usize) -> SyncResult<String> {
        self.count("key_entry_list_get_algorithm");
        self.inner.key_entry_list_get_algorithm(list, index)
    }

    fn key_entry_list_get_name(&self, list: Handle, index: usize) -> SyncResult<String> {
        self.count("key_entry_list_get_name");
        self.inner.key_entry_list_get_name(list, index)
    }

    fn key_entry_list_get_metadata(
        &self,
        list: Handle,
        index: usize,
    ) -> SyncResult<Option<String>> {
        self.count("key_entry_list_get_metadata");
        self.inner.key_entry_list_get_metadata(list, index)
    }

    fn key_entry_list_get_tags(&self, list: Handle, index: usize) -> SyncResult<String> {
        self.count("key_entry_list_get_tags");
        self.inner.key_entry_list_get_tags(list, index)
    }

    fn key_entry_list_load_local(&self, list: Handle, index: usize) -> SyncResult<Handle> {
        self.count("key_entry_list_load_local");
        self.inner.key_entry_list_load_local(list, index)
    }

    fn key_entry_list_free(&self, list: Handle) -> StatusCode {
        self.count("key_entry_list_free");
        self.inner.key_entry_list_free(list)
    }

    fn key_generate(&self, alg: &str, ephemeral: bool) -> SyncResult<Handle> {
        self.count("key_generate");
        self.inner.key_generate(alg, ephemeral)
    }

    fn key_get_algorithm(&self, key: Handle) -> SyncResult<String> {
        self.count("key_get_algorithm");
        self.inner.key_get_algorithm(key)
    }

    fn key_get_public_bytes(&self, key: Handle) -> SyncResult<Bytes> {
        self.count("key_get_public_bytes");
        self.inner.key_get_public_bytes(key)
    }

    fn key_free(&self, key: Handle) -> StatusCode {
        self.count("key_free");
        self.inner.key_free(key)
    }
}
