//! Sessions and transactions.
//!
//! A [`Session`] is detached until started, started while it holds an engine
//! handle, and closed once committed or rolled back. Every operation checks
//! for a started handle before reaching the engine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lockbox_core::{Handle, KeyAlg, KeyQuery, KeyRecord, RecordUpdate, UpdateOperation};
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::key::LocalKey;
use crate::results::{EntryList, KeyEntryList};
use crate::store::{Store, StoreShared};

const NO_EXPIRY: i64 = -1;

#[derive(Debug, Default)]
struct SessionSlot {
    handle: Option<Handle>,
    starting: bool,
}

/// Handle cell shared between a session and its store's slot.
#[derive(Debug, Default)]
pub(crate) struct SessionShared {
    slot: Mutex<SessionSlot>,
}

impl SessionShared {
    fn lock(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle(&self) -> Option<Handle> {
        self.lock().handle
    }

    /// Started, or in the middle of starting.
    pub(crate) fn is_active(&self) -> bool {
        let slot = self.lock();
        slot.handle.is_some() || slot.starting
    }

    /// Mark the session as starting. Fails if it is already active.
    pub(crate) fn begin_start(&self) -> bool {
        let mut slot = self.lock();
        if slot.handle.is_some() || slot.starting {
            return false;
        }
        slot.starting = true;
        true
    }

    /// Record the outcome of a start. Returns `false` if the session was
    /// cleared while starting, in which case `handle` is not kept.
    fn finish_start(&self, handle: Option<Handle>) -> bool {
        let mut slot = self.lock();
        let kept = slot.starting;
        slot.starting = false;
        if kept {
            slot.handle = handle;
        }
        kept
    }

    fn take(&self) -> Option<Handle> {
        self.lock().handle.take()
    }

    /// Null the handle, including one still being started.
    pub(crate) fn clear(&self) {
        let mut slot = self.lock();
        slot.handle = None;
        slot.starting = false;
    }
}

/// A session or transaction over one profile of a store.
#[derive(Debug)]
pub struct Session {
    client: Client,
    store: Arc<StoreShared>,
    shared: Arc<SessionShared>,
    profile: Option<String>,
    is_transaction: bool,
}

impl Session {
    pub(crate) fn detached(store: &Store, profile: Option<&str>, is_transaction: bool) -> Self {
        Self {
            client: store.client().clone(),
            store: Arc::clone(store.shared()),
            shared: Arc::new(SessionShared::default()),
            profile: profile.map(str::to_owned),
            is_transaction,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// The engine handle; `None` unless started.
    pub fn handle(&self) -> Option<Handle> {
        self.shared.handle()
    }

    /// The owning store's handle; `None` once the store is closed.
    pub fn store_handle(&self) -> Option<Handle> {
        self.store.handle()
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn is_transaction(&self) -> bool {
        self.is_transaction
    }

    fn require(&self, message: &str) -> Result<Handle> {
        self.shared.handle().ok_or_else(|| Error::lifecycle(message))
    }

    /// Start a detached (or previously closed) session.
    pub async fn start(&self) -> Result<()> {
        let store = self.store.reserve(&self.shared)?;
        let profile = self.profile.as_deref();
        let is_transaction = self.is_transaction;

        let started: Result<Handle> = self
            .client
            .call("session_start", |engine, cb, id| {
                engine.session_start(store, profile, is_transaction, cb, id)
            })
            .await;

        let handle = match started {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.finish_start(None);
                self.store.release(&self.shared);
                return Err(err);
            }
        };

        if !self.shared.finish_start(Some(handle)) {
            // The store was closed while the session was starting.
            if let Err(err) = self.close_handle(handle, false).await {
                warn!(%handle, error = %err, "failed to release orphaned session");
            }
            return Err(Error::lifecycle("Cannot start session from closed store"));
        }
        debug!(%handle, is_transaction, "started session");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────────

    /// Count the records in `category` matching `tag_filter`.
    pub async fn count(&self, category: &str, tag_filter: Option<&str>) -> Result<i64> {
        let session = self.require("Cannot count from closed session")?;
        self.client
            .call("session_count", |engine, cb, id| {
                engine.session_count(session, category, tag_filter, cb, id)
            })
            .await
    }

    /// Fetch one record. `None` when it does not exist.
    pub async fn fetch(&self, category: &str, name: &str, for_update: bool) -> Result<Option<EntryList>> {
        let session = self.require("Cannot fetch from closed session")?;
        let list: Option<Handle> = self
            .client
            .call("session_fetch", |engine, cb, id| {
                engine.session_fetch(session, category, name, for_update, cb, id)
            })
            .await?;
        Ok(list.map(|handle| EntryList::new(&self.client, handle)))
    }

    /// Fetch every record in `category` matching `tag_filter`, up to
    /// `limit` (`-1` is unbounded).
    pub async fn fetch_all(
        &self,
        category: &str,
        tag_filter: Option<&str>,
        limit: i64,
        for_update: bool,
    ) -> Result<EntryList> {
        let session = self.require("Cannot fetch from closed session")?;
        let list: Handle = self
            .client
            .call("session_fetch_all", |engine, cb, id| {
                engine.session_fetch_all(session, category, tag_filter, limit, for_update, cb, id)
            })
            .await?;
        Ok(EntryList::new(&self.client, list))
    }

    /// Insert a new record. An existing record is a `Duplicate` error.
    pub async fn insert(
        &self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<&str>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        self.require("Cannot update closed session")?;
        self.update(UpdateOperation::Insert, category, name, Some(value), tags, expiry_ms)
            .await
    }

    /// Replace an existing record. A missing record is a `NotFound` error.
    pub async fn replace(
        &self,
        category: &str,
        name: &str,
        value: &[u8],
        tags: Option<&str>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        self.require("Cannot update closed session")?;
        self.update(UpdateOperation::Replace, category, name, Some(value), tags, expiry_ms)
            .await
    }

    /// Remove an existing record. A missing record is a `NotFound` error.
    pub async fn remove(&self, category: &str, name: &str) -> Result<()> {
        self.require("Cannot remove for closed session")?;
        self.update(UpdateOperation::Remove, category, name, None, None, None)
            .await
    }

    /// The update primitive behind [`insert`](Self::insert),
    /// [`replace`](Self::replace) and [`remove`](Self::remove).
    pub async fn update(
        &self,
        operation: UpdateOperation,
        category: &str,
        name: &str,
        value: Option<&[u8]>,
        tags: Option<&str>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        let session = self.require("Cannot update closed session")?;
        let update = RecordUpdate {
            operation: operation.to_u8(),
            category,
            name,
            value,
            tags,
            expiry_ms: expiry_ms.unwrap_or(NO_EXPIRY),
        };
        self.client
            .call("session_update", |engine, cb, id| {
                engine.session_update(session, update, cb, id)
            })
            .await
    }

    /// Remove every record in `category` matching `tag_filter`. Returns how
    /// many were removed.
    pub async fn remove_all(&self, category: &str, tag_filter: Option<&str>) -> Result<i64> {
        let session = self.require("Cannot remove all for closed session")?;
        self.client
            .call("session_remove_all", |engine, cb, id| {
                engine.session_remove_all(session, category, tag_filter, cb, id)
            })
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keys
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn insert_key(
        &self,
        key: &LocalKey,
        name: &str,
        metadata: Option<&str>,
        tags: Option<&str>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        let session = self.require("Cannot insert key with closed session")?;
        let record = KeyRecord {
            name,
            metadata,
            tags,
            expiry_ms: expiry_ms.unwrap_or(NO_EXPIRY),
        };
        let key = key.handle();
        self.client
            .call("session_insert_key", |engine, cb, id| {
                engine.session_insert_key(session, key, record, cb, id)
            })
            .await
    }

    /// Fetch one stored key. `None` when it does not exist.
    pub async fn fetch_key(&self, name: &str, for_update: bool) -> Result<Option<KeyEntryList>> {
        let session = self.require("Cannot fetch key from closed session")?;
        let list: Option<Handle> = self
            .client
            .call("session_fetch_key", |engine, cb, id| {
                engine.session_fetch_key(session, name, for_update, cb, id)
            })
            .await?;
        Ok(list.map(|handle| KeyEntryList::new(&self.client, handle)))
    }

    /// Fetch stored keys by algorithm, thumbprint and tags, up to `limit`
    /// (`-1` is unbounded).
    pub async fn fetch_all_keys(
        &self,
        alg: Option<KeyAlg>,
        thumbprint: Option<&str>,
        tag_filter: Option<&str>,
        limit: i64,
        for_update: bool,
    ) -> Result<KeyEntryList> {
        let session = self.require("Cannot fetch key from closed session")?;
        let query = KeyQuery {
            alg: alg.map(KeyAlg::as_str),
            thumbprint,
            tag_filter,
            limit,
            for_update,
        };
        let list: Handle = self
            .client
            .call("session_fetch_all_keys", |engine, cb, id| {
                engine.session_fetch_all_keys(session, query, cb, id)
            })
            .await?;
        Ok(KeyEntryList::new(&self.client, list))
    }

    /// Replace a stored key's metadata, tags and expiry.
    pub async fn update_key(
        &self,
        name: &str,
        metadata: Option<&str>,
        tags: Option<&str>,
        expiry_ms: Option<i64>,
    ) -> Result<()> {
        let session = self.require("Cannot update key with closed session")?;
        let record = KeyRecord {
            name,
            metadata,
            tags,
            expiry_ms: expiry_ms.unwrap_or(NO_EXPIRY),
        };
        self.client
            .call("session_update_key", |engine, cb, id| {
                engine.session_update_key(session, record, cb, id)
            })
            .await
    }

    pub async fn remove_key(&self, name: &str) -> Result<()> {
        let session = self.require("Cannot remove key with closed session")?;
        self.client
            .call("session_remove_key", |engine, cb, id| {
                engine.session_remove_key(session, name, cb, id)
            })
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Closing
    // ─────────────────────────────────────────────────────────────────────────

    /// Close the session, committing a transaction.
    pub async fn close_and_commit(&self) -> Result<()> {
        self.close(
            true,
            "Cannot close and commit already closed sessions or transactions",
        )
        .await
    }

    /// Close the session, rolling back a transaction.
    pub async fn close_and_rollback(&self) -> Result<()> {
        self.close(
            false,
            "Cannot close and rollback already closed sessions or transactions",
        )
        .await
    }

    /// The handle is taken before the engine call, so a session closes at
    /// most once whatever the engine reports.
    async fn close(&self, commit: bool, message: &str) -> Result<()> {
        let handle = self.shared.take().ok_or_else(|| Error::lifecycle(message))?;
        let closed = self.close_handle(handle, commit).await;
        self.store.release(&self.shared);
        if closed.is_ok() {
            debug!(%handle, commit, "closed session");
        }
        closed
    }

    async fn close_handle(&self, handle: Handle, commit: bool) -> Result<()> {
        self.client
            .call("session_close", |engine, cb, id| {
                engine.session_close(handle, commit, cb, id)
            })
            .await
    }
}
