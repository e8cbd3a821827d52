//! The embedded engine: handle tables plus a blocking worker per call.

use std::sync::Arc;

use bytes::Bytes;
use lockbox_core::{
    log_level, CallbackId, CompletionFn, Engine, Handle, KeyMethod, KeyQuery, KeyRecord, LogSink,
    Payload, RecordUpdate, ScanParams, StatusCode, StoreSpec, SyncResult, UpdateOperation,
};

use crate::crypto;
use crate::error::{self, EngineError, Result};
use crate::filter::{TagFilter, Tags};
use crate::handles::HandleTable;
use crate::keys::LocalKey;
use crate::logging::{emit, Logger, TracingSink};
use crate::results::{EntrySet, KeyEntrySet};
use crate::session::{ScanState, SessionState};
use crate::sqlite::SqliteStore;
use crate::uri::StoreUri;

/// Return the recorded status from a trait method when `$expr` fails.
macro_rules! try_status {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(err) => return error::record(&err),
        }
    };
}

struct Shared {
    stores: HandleTable<SqliteStore>,
    sessions: HandleTable<SessionState>,
    scans: HandleTable<ScanState>,
    entry_lists: HandleTable<EntrySet>,
    key_entry_lists: HandleTable<KeyEntrySet>,
    keys: HandleTable<LocalKey>,
    logger: Logger,
}

/// An in-process engine backed by SQLite.
///
/// Asynchronous operations run on the current tokio runtime's blocking pool
/// and complete on that worker thread.
#[derive(Clone)]
pub struct EmbeddedEngine {
    shared: Arc<Shared>,
}

impl Default for EmbeddedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EmbeddedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedEngine")
            .field("stores", &self.shared.stores.len())
            .field("sessions", &self.shared.sessions.len())
            .field("scans", &self.shared.scans.len())
            .finish_non_exhaustive()
    }
}

impl EmbeddedEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                stores: HandleTable::new("store"),
                sessions: HandleTable::new("session"),
                scans: HandleTable::new("scan"),
                entry_lists: HandleTable::new("entry list"),
                key_entry_lists: HandleTable::new("key entry list"),
                keys: HandleTable::new("key"),
                logger: Logger::default(),
            }),
        }
    }

    /// Run `work` on a blocking worker and report its outcome through `cb`.
    fn spawn<F>(&self, op: &'static str, cb: CompletionFn, cb_id: CallbackId, work: F) -> StatusCode
    where
        F: FnOnce(&Shared) -> Result<Payload> + Send + 'static,
    {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                return error::record(&EngineError::Unexpected(
                    "No async runtime available".into(),
                ))
            }
        };

        let shared = Arc::clone(&self.shared);
        emit!(shared.logger, log_level::TRACE, "{} queued as callback {}", op, cb_id);
        runtime.spawn_blocking(move || match work(&shared) {
            Ok(payload) => {
                error::clear();
                cb(cb_id, StatusCode::SUCCESS, payload);
            }
            Err(err) => {
                emit!(shared.logger, log_level::DEBUG, "{} failed: {}", op, err);
                let status = error::record(&err);
                cb(cb_id, status, Payload::None);
            }
        });
        StatusCode::SUCCESS
    }
}

/// Map a synchronous accessor outcome onto the boundary's status form.
fn sync<T>(result: Result<T>) -> SyncResult<T> {
    match result {
        Ok(value) => {
            error::clear();
            Ok(value)
        }
        Err(err) => Err(error::record(&err)),
    }
}

fn parse_method(method: Option<&str>) -> Result<Option<KeyMethod>> {
    method
        .map(|m| {
            KeyMethod::parse(m)
                .ok_or_else(|| EngineError::Unsupported(format!("Unsupported key method: {}", m)))
        })
        .transpose()
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_owned)
}

impl Engine for EmbeddedEngine {
    // ─────────────────────────────────────────────────────────────────────────
    // Error surface & housekeeping
    // ─────────────────────────────────────────────────────────────────────────

    fn current_error(&self) -> String {
        error::current_json()
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_owned()
    }

    fn terminate(&self) {
        let shared = &self.shared;
        emit!(shared.logger, log_level::INFO, "Terminating engine");
        shared.scans.clear();
        shared.sessions.clear();
        shared.entry_lists.clear();
        shared.key_entry_lists.clear();
        shared.keys.clear();
        shared.stores.clear();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    fn set_custom_logger(&self, sink: Arc<dyn LogSink>, max_level: i32) -> StatusCode {
        if !(log_level::UNCHANGED..=log_level::TRACE).contains(&max_level) {
            return error::record(&EngineError::Input(format!(
                "Invalid log level: {}",
                max_level
            )));
        }
        self.shared.logger.set_sink(sink, max_level);
        StatusCode::SUCCESS
    }

    fn clear_custom_logger(&self) {
        self.shared.logger.clear_sink();
    }

    fn set_default_logger(&self) -> StatusCode {
        self.shared
            .logger
            .set_sink(Arc::new(TracingSink), log_level::TRACE);
        StatusCode::SUCCESS
    }

    fn set_max_log_level(&self, max_level: i32) -> StatusCode {
        if !(log_level::UNCHANGED..=log_level::TRACE).contains(&max_level) {
            return error::record(&EngineError::Input(format!(
                "Invalid log level: {}",
                max_level
            )));
        }
        self.shared.logger.set_max_level(max_level);
        StatusCode::SUCCESS
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store operations
    // ─────────────────────────────────────────────────────────────────────────

    fn store_generate_raw_key(&self, seed: Option<&[u8]>) -> SyncResult<String> {
        sync(Ok(crypto::generate_raw_key(seed)))
    }

    fn store_provision(
        &self,
        spec: StoreSpec<'_>,
        recreate: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let uri = try_status!(StoreUri::parse(spec.uri));
        let method = try_status!(parse_method(spec.key_method)).unwrap_or_default();
        let pass_key = owned(spec.pass_key);
        let profile = owned(spec.profile);

        self.spawn("store_provision", cb, cb_id, move |shared| {
            let store = SqliteStore::provision(
                &uri,
                method,
                pass_key.as_deref(),
                profile.as_deref(),
                recreate,
            )?;
            emit!(shared.logger, log_level::INFO, "Provisioned store {}", uri);
            Ok(Payload::Handle(Some(shared.stores.insert(store))))
        })
    }

    fn store_open(&self, spec: StoreSpec<'_>, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let uri = try_status!(StoreUri::parse(spec.uri));
        let method = try_status!(parse_method(spec.key_method));
        let pass_key = owned(spec.pass_key);
        let profile = owned(spec.profile);

        self.spawn("store_open", cb, cb_id, move |shared| {
            let store = SqliteStore::open(&uri, method, pass_key.as_deref(), profile.as_deref())?;
            emit!(shared.logger, log_level::INFO, "Opened store {}", uri);
            Ok(Payload::Handle(Some(shared.stores.insert(store))))
        })
    }

    fn store_remove(&self, uri: &str, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let uri = try_status!(StoreUri::parse(uri));
        self.spawn("store_remove", cb, cb_id, move |shared| {
            let removed = SqliteStore::remove_backing(&uri)?;
            emit!(shared.logger, log_level::INFO, "Removed store {}: {}", uri, removed);
            Ok(Payload::Flag(removed))
        })
    }

    fn store_create_profile(
        &self,
        store: Handle,
        profile: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let store = try_status!(self.shared.stores.get(store));
        let profile = owned(profile);
        self.spawn("store_create_profile", cb, cb_id, move |_| {
            store.create_profile(profile.as_deref()).map(Payload::Text)
        })
    }

    fn store_get_profile_name(
        &self,
        store: Handle,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let store = try_status!(self.shared.stores.get(store));
        self.spawn("store_get_profile_name", cb, cb_id, move |_| {
            Ok(Payload::Text(store.default_profile().to_owned()))
        })
    }

    fn store_remove_profile(
        &self,
        store: Handle,
        profile: &str,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let store = try_status!(self.shared.stores.get(store));
        let profile = profile.to_owned();
        self.spawn("store_remove_profile", cb, cb_id, move |_| {
            store.remove_profile(&profile).map(Payload::Flag)
        })
    }

    fn store_rekey(
        &self,
        store: Handle,
        key_method: Option<&str>,
        pass_key: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let store = try_status!(self.shared.stores.get(store));
        let method = try_status!(parse_method(key_method)).unwrap_or_default();
        let pass_key = owned(pass_key);
        self.spawn("store_rekey", cb, cb_id, move |shared| {
            store.rekey(method, pass_key.as_deref())?;
            emit!(shared.logger, log_level::INFO, "Rekeyed store {} with {}", store.uri(), method);
            Ok(Payload::None)
        })
    }

    fn store_close(&self, store: Handle, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let store = try_status!(self.shared.stores.remove(store));
        let sessions = self.shared.sessions.remove_where(|s| s.is_bound_to(&store));
        let scans = self.shared.scans.remove_where(|s| s.is_bound_to(&store));
        self.spawn("store_close", cb, cb_id, move |shared| {
            // Sessions still open on the store are rolled back.
            for session in &sessions {
                if let Err(err) = session.close(false) {
                    emit!(
                        shared.logger,
                        log_level::WARN,
                        "Failed to roll back session of {}: {}",
                        store.uri(),
                        err
                    );
                }
            }
            drop(scans);
            emit!(
                shared.logger,
                log_level::INFO,
                "Closed store {} ({} open sessions)",
                store.uri(),
                sessions.len()
            );
            Ok(Payload::None)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scan operations
    // ─────────────────────────────────────────────────────────────────────────

    fn scan_start(
        &self,
        store: Handle,
        params: &ScanParams,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let store = try_status!(self.shared.stores.get(store));
        let filter = try_status!(TagFilter::parse(params.tag_filter.as_deref()));
        let params = params.clone();
        self.spawn("scan_start", cb, cb_id, move |shared| {
            let scan = ScanState::start(
                store,
                params.profile.as_deref(),
                params.category,
                filter,
                params.offset,
                params.limit,
            )?;
            Ok(Payload::Handle(Some(shared.scans.insert(scan))))
        })
    }

    fn scan_next(&self, scan: Handle, cb: CompletionFn, cb_id: CallbackId) -> StatusCode {
        let scan = try_status!(self.shared.scans.get(scan));
        self.spawn("scan_next", cb, cb_id, move |shared| {
            let list = scan
                .next_page()?
                .map(|page| shared.entry_lists.insert(page));
            Ok(Payload::Handle(list))
        })
    }

    fn scan_free(&self, scan: Handle) -> StatusCode {
        try_status!(self.shared.scans.remove(scan));
        StatusCode::SUCCESS
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session operations
    // ─────────────────────────────────────────────────────────────────────────

    fn session_start(
        &self,
        store: Handle,
        profile: Option<&str>,
        as_transaction: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let store = try_status!(self.shared.stores.get(store));
        let profile = owned(profile);
        self.spawn("session_start", cb, cb_id, move |shared| {
            let session = SessionState::start(store, profile.as_deref(), as_transaction)?;
            emit!(
                shared.logger,
                log_level::DEBUG,
                "Started {} on profile {}",
                if session.is_transaction() { "transaction" } else { "session" },
                session.profile_name()
            );
            Ok(Payload::Handle(Some(shared.sessions.insert(session))))
        })
    }

    fn session_count(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let filter = try_status!(TagFilter::parse(tag_filter));
        let category = category.to_owned();
        self.spawn("session_count", cb, cb_id, move |_| {
            session.count(&category, filter.as_ref()).map(Payload::Count)
        })
    }

    fn session_fetch(
        &self,
        session: Handle,
        category: &str,
        name: &str,
        _for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let category = category.to_owned();
        let name = name.to_owned();
        self.spawn("session_fetch", cb, cb_id, move |shared| {
            let list = session
                .fetch(&category, &name)?
                .map(|entries| shared.entry_lists.insert(entries));
            Ok(Payload::Handle(list))
        })
    }

    fn session_fetch_all(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        limit: i64,
        _for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let filter = try_status!(TagFilter::parse(tag_filter));
        let category = category.to_owned();
        self.spawn("session_fetch_all", cb, cb_id, move |shared| {
            let entries = session.fetch_all(&category, filter.as_ref(), limit)?;
            Ok(Payload::Handle(Some(shared.entry_lists.insert(entries))))
        })
    }

    fn session_remove_all(
        &self,
        session: Handle,
        category: &str,
        tag_filter: Option<&str>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let filter = try_status!(TagFilter::parse(tag_filter));
        let category = category.to_owned();
        self.spawn("session_remove_all", cb, cb_id, move |_| {
            session
                .remove_all(&category, filter.as_ref())
                .map(Payload::Count)
        })
    }

    fn session_update(
        &self,
        session: Handle,
        update: RecordUpdate<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let operation = try_status!(UpdateOperation::from_u8(update.operation).ok_or_else(|| {
            EngineError::Input(format!("Invalid update operation: {}", update.operation))
        }));
        if operation != UpdateOperation::Remove && update.value.is_none() {
            return error::record(&EngineError::Input("Entry value is required".into()));
        }
        let tags = try_status!(Tags::parse(update.tags));
        let category = update.category.to_owned();
        let name = update.name.to_owned();
        let value = update.value.map(Bytes::copy_from_slice);
        let expiry_ms = update.expiry_ms;

        self.spawn("session_update", cb, cb_id, move |_| {
            session.update(
                operation,
                &category,
                &name,
                value.as_deref(),
                &tags,
                expiry_ms,
            )?;
            Ok(Payload::None)
        })
    }

    fn session_insert_key(
        &self,
        session: Handle,
        key: Handle,
        record: KeyRecord<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let key = try_status!(self.shared.keys.get(key));
        try_status!(Tags::parse(record.tags));
        let name = record.name.to_owned();
        let metadata = owned(record.metadata);
        let tags = owned(record.tags);
        let expiry_ms = record.expiry_ms;

        self.spawn("session_insert_key", cb, cb_id, move |_| {
            session.insert_key(
                &key,
                &KeyRecord {
                    name: &name,
                    metadata: metadata.as_deref(),
                    tags: tags.as_deref(),
                    expiry_ms,
                },
            )?;
            Ok(Payload::None)
        })
    }

    fn session_fetch_key(
        &self,
        session: Handle,
        name: &str,
        _for_update: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let name = name.to_owned();
        self.spawn("session_fetch_key", cb, cb_id, move |shared| {
            let list = session
                .fetch_key(&name)?
                .map(|keys| shared.key_entry_lists.insert(keys));
            Ok(Payload::Handle(list))
        })
    }

    fn session_fetch_all_keys(
        &self,
        session: Handle,
        query: KeyQuery<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        try_status!(TagFilter::parse(query.tag_filter));
        let alg = owned(query.alg);
        let thumbprint = owned(query.thumbprint);
        let tag_filter = owned(query.tag_filter);
        let limit = query.limit;
        let for_update = query.for_update;

        self.spawn("session_fetch_all_keys", cb, cb_id, move |shared| {
            let keys = session.fetch_all_keys(&KeyQuery {
                alg: alg.as_deref(),
                thumbprint: thumbprint.as_deref(),
                tag_filter: tag_filter.as_deref(),
                limit,
                for_update,
            })?;
            Ok(Payload::Handle(Some(shared.key_entry_lists.insert(keys))))
        })
    }

    fn session_update_key(
        &self,
        session: Handle,
        record: KeyRecord<'_>,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        try_status!(Tags::parse(record.tags));
        let name = record.name.to_owned();
        let metadata = owned(record.metadata);
        let tags = owned(record.tags);
        let expiry_ms = record.expiry_ms;

        self.spawn("session_update_key", cb, cb_id, move |_| {
            session.update_key(&KeyRecord {
                name: &name,
                metadata: metadata.as_deref(),
                tags: tags.as_deref(),
                expiry_ms,
            })?;
            Ok(Payload::None)
        })
    }

    fn session_remove_key(
        &self,
        session: Handle,
        name: &str,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.get(session));
        let name = name.to_owned();
        self.spawn("session_remove_key", cb, cb_id, move |_| {
            session.remove_key(&name)?;
            Ok(Payload::None)
        })
    }

    fn session_close(
        &self,
        session: Handle,
        commit: bool,
        cb: CompletionFn,
        cb_id: CallbackId,
    ) -> StatusCode {
        let session = try_status!(self.shared.sessions.remove(session));
        self.spawn("session_close", cb, cb_id, move |shared| {
            session.close(commit)?;
            if session.is_transaction() {
                emit!(
                    shared.logger,
                    log_level::DEBUG,
                    "Transaction {}",
                    if commit { "committed" } else { "rolled back" }
                );
            }
            Ok(Payload::None)
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry lists
    // ─────────────────────────────────────────────────────────────────────────

    fn entry_list_count(&self, list: Handle) -> SyncResult<usize> {
        sync(self.shared.entry_lists.get(list).map(|l| l.len()))
    }

    fn entry_list_get_category(&self, list: Handle, index: usize) -> SyncResult<String> {
        sync(
            self.shared
                .entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|e| e.category.clone())),
        )
    }

    fn entry_list_get_name(&self, list: Handle, index: usize) -> SyncResult<String> {
        sync(
            self.shared
                .entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|e| e.name.clone())),
        )
    }

    fn entry_list_get_value(&self, list: Handle, index: usize) -> SyncResult<Bytes> {
        sync(
            self.shared
                .entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|e| e.value.clone())),
        )
    }

    fn entry_list_get_tags(&self, list: Handle, index: usize) -> SyncResult<String> {
        sync(
            self.shared
                .entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|e| e.tags.to_json())),
        )
    }

    fn entry_list_free(&self, list: Handle) -> StatusCode {
        try_status!(self.shared.entry_lists.remove(list));
        StatusCode::SUCCESS
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Key-entry lists
    // ─────────────────────────────────────────────────────────────────────────

    fn key_entry_list_count(&self, list: Handle) -> SyncResult<usize> {
        sync(self.shared.key_entry_lists.get(list).map(|l| l.len()))
    }

    fn key_entry_list_get_algorithm(&self, list: Handle, index: usize) -> SyncResult<String> {
        sync(
            self.shared
                .key_entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|k| k.algorithm().to_owned())),
        )
    }

    fn key_entry_list_get_name(&self, list: Handle, index: usize) -> SyncResult<String> {
        sync(
            self.shared
                .key_entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|k| k.name.clone())),
        )
    }

    fn key_entry_list_get_metadata(
        &self,
        list: Handle,
        index: usize,
    ) -> SyncResult<Option<String>> {
        sync(
            self.shared
                .key_entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|k| k.metadata.clone())),
        )
    }

    fn key_entry_list_get_tags(&self, list: Handle, index: usize) -> SyncResult<String> {
        sync(
            self.shared
                .key_entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|k| k.tags.to_json())),
        )
    }

    fn key_entry_list_load_local(&self, list: Handle, index: usize) -> SyncResult<Handle> {
        let shared = &self.shared;
        sync(
            shared
                .key_entry_lists
                .get(list)
                .and_then(|l| l.get(index).map(|k| k.key.clone()))
                .map(|key| shared.keys.insert(key)),
        )
    }

    fn key_entry_list_free(&self, list: Handle) -> StatusCode {
        try_status!(self.shared.key_entry_lists.remove(list));
        StatusCode::SUCCESS
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local keys
    // ─────────────────────────────────────────────────────────────────────────

    fn key_generate(&self, alg: &str, ephemeral: bool) -> SyncResult<Handle> {
        let shared = &self.shared;
        sync(LocalKey::generate(alg, ephemeral).map(|key| shared.keys.insert(key)))
    }

    fn key_get_algorithm(&self, key: Handle) -> SyncResult<String> {
        sync(
            self.shared
                .keys
                .get(key)
                .map(|k| k.algorithm().to_owned()),
        )
    }

    fn key_get_public_bytes(&self, key: Handle) -> SyncResult<Bytes> {
        sync(
            self.shared
                .keys
                .get(key)
                .and_then(|k| k.public_bytes())
                .map(Bytes::from),
        )
    }

    fn key_free(&self, key: Handle) -> StatusCode {
        try_status!(self.shared.keys.remove(key));
        StatusCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lockbox_core::{ErrorKind, ErrorReport};
    use tokio::sync::mpsc;

    type Completion = (CallbackId, StatusCode, Payload, String);

    /// A completion function that forwards each completion, plus the
    /// last-error document read on the completing thread.
    fn channel(engine: &EmbeddedEngine) -> (CompletionFn, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let engine = engine.clone();
        let cb: CompletionFn = Arc::new(move |id: CallbackId, status: StatusCode, payload: Payload| {
            let error = engine.current_error();
            let _ = tx.send((id, status, payload, error));
        });
        (cb, rx)
    }

    fn memory() -> StoreSpec<'static> {
        StoreSpec {
            uri: "sqlite://:memory:",
            key_method: None,
            pass_key: None,
            profile: None,
        }
    }

    async fn handle(rx: &mut mpsc::UnboundedReceiver<Completion>) -> Handle {
        match rx.recv().await.unwrap() {
            (_, status, Payload::Handle(Some(h)), _) if status.is_success() => h,
            other => panic!("unexpected completion: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_completion_echoes_callback_id() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);

        assert!(engine.store_provision(memory(), false, cb, 41).is_success());
        let (id, status, payload, _) = rx.recv().await.unwrap();
        assert_eq!(id, 41);
        assert!(status.is_success());
        assert!(matches!(payload, Payload::Handle(Some(_))));
    }

    #[tokio::test]
    async fn test_async_failure_sets_last_error_on_completing_thread() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);

        assert!(engine.store_provision(memory(), false, cb.clone(), 1).is_success());
        let store = handle(&mut rx).await;
        assert!(engine.session_start(store, None, false, cb.clone(), 2).is_success());
        let session = handle(&mut rx).await;

        let update = RecordUpdate {
            operation: UpdateOperation::Remove.to_u8(),
            category: "cat",
            name: "missing",
            value: None,
            tags: None,
            expiry_ms: -1,
        };
        assert!(engine.session_update(session, update, cb, 3).is_success());
        let (id, status, payload, error) = rx.recv().await.unwrap();
        assert_eq!(id, 3);
        assert_eq!(status.kind(), ErrorKind::NotFound);
        assert_eq!(payload, Payload::None);
        assert_eq!(ErrorReport::parse(&error).unwrap().code, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_sync_rejection_never_completes() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);

        let spec = StoreSpec {
            uri: "postgres://localhost/db",
            ..memory()
        };
        let status = engine.store_provision(spec, false, cb.clone(), 9);
        assert_eq!(status.kind(), ErrorKind::Unsupported);
        let report = ErrorReport::parse(&engine.current_error()).unwrap();
        assert_eq!(report.code, ErrorKind::Unsupported);

        let bogus = Handle::from_raw(u64::MAX).unwrap();
        assert_eq!(
            engine.session_start(bogus, None, false, cb, 10).kind(),
            ErrorKind::Input
        );

        drop(engine);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_runtime_is_unexpected() {
        let engine = EmbeddedEngine::new();
        let cb: CompletionFn =
            Arc::new(|_: CallbackId, _: StatusCode, _: Payload| panic!("must not complete"));
        let status = engine.store_provision(memory(), false, cb, 1);
        assert_eq!(status.kind(), ErrorKind::Unexpected);
    }

    #[tokio::test]
    async fn test_invalid_update_operation_and_missing_value() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);
        engine.store_provision(memory(), false, cb.clone(), 1);
        let store = handle(&mut rx).await;
        engine.session_start(store, None, false, cb.clone(), 2);
        let session = handle(&mut rx).await;

        let mut update = RecordUpdate {
            operation: 7,
            category: "cat",
            name: "n",
            value: Some(b"v"),
            tags: None,
            expiry_ms: -1,
        };
        assert_eq!(
            engine.session_update(session, update, cb.clone(), 3).kind(),
            ErrorKind::Input
        );
        update.operation = UpdateOperation::Insert.to_u8();
        update.value = None;
        assert_eq!(
            engine.session_update(session, update, cb, 4).kind(),
            ErrorKind::Input
        );
    }

    #[tokio::test]
    async fn test_entry_list_double_free() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);
        engine.store_provision(memory(), false, cb.clone(), 1);
        let store = handle(&mut rx).await;
        engine.session_start(store, None, false, cb.clone(), 2);
        let session = handle(&mut rx).await;

        engine.session_fetch_all(session, "cat", None, -1, false, cb, 3);
        let list = handle(&mut rx).await;
        assert_eq!(engine.entry_list_count(list), Ok(0));
        assert_eq!(
            engine.entry_list_get_name(list, 0).map_err(StatusCode::kind),
            Err(ErrorKind::Input)
        );
        assert!(engine.entry_list_free(list).is_success());
        assert_eq!(engine.entry_list_free(list).kind(), ErrorKind::Input);
        assert_eq!(
            engine.entry_list_count(list).map_err(StatusCode::kind),
            Err(ErrorKind::Input)
        );
    }

    #[tokio::test]
    async fn test_store_close_ends_bound_sessions_and_scans() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);
        engine.store_provision(memory(), false, cb.clone(), 1);
        let store = handle(&mut rx).await;
        engine.store_provision(memory(), false, cb.clone(), 2);
        let other = handle(&mut rx).await;

        engine.session_start(store, None, true, cb.clone(), 3);
        let txn = handle(&mut rx).await;
        engine.session_start(other, None, false, cb.clone(), 4);
        let kept = handle(&mut rx).await;
        let params = ScanParams {
            profile: None,
            category: "cat".into(),
            tag_filter: None,
            offset: 0,
            limit: -1,
        };
        engine.scan_start(store, &params, cb.clone(), 5);
        let scan = handle(&mut rx).await;

        assert!(engine.store_close(store, cb.clone(), 6).is_success());
        let (id, status, _, _) = rx.recv().await.unwrap();
        assert_eq!(id, 6);
        assert!(status.is_success());

        assert_eq!(
            engine.session_count(txn, "cat", None, cb.clone(), 7).kind(),
            ErrorKind::Input
        );
        assert_eq!(engine.scan_free(scan).kind(), ErrorKind::Input);
        assert_eq!(engine.shared.sessions.len(), 1);
        assert!(engine.shared.scans.is_empty());

        // Sessions on other stores are untouched.
        assert!(engine.session_close(kept, true, cb, 8).is_success());
        assert!(rx.recv().await.unwrap().1.is_success());
    }

    #[tokio::test]
    async fn test_terminate_releases_handles() {
        let engine = EmbeddedEngine::new();
        let (cb, mut rx) = channel(&engine);
        engine.store_provision(memory(), false, cb.clone(), 1);
        let store = handle(&mut rx).await;
        let key = engine.key_generate("ed25519", true).unwrap();

        engine.terminate();
        assert_eq!(
            engine.store_get_profile_name(store, cb, 2).kind(),
            ErrorKind::Input
        );
        assert!(engine.key_get_algorithm(key).is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let engine = EmbeddedEngine::new();
        assert!(engine.set_max_log_level(log_level::DEBUG).is_success());
        assert!(engine.set_max_log_level(log_level::UNCHANGED).is_success());
        assert_eq!(engine.set_max_log_level(9).kind(), ErrorKind::Input);
        assert!(engine.set_default_logger().is_success());
        engine.clear_custom_logger();
    }
}
