//! Stores and their lifecycle.
//!
//! A [`Store`] is open while it holds an engine handle. It tracks at most one
//! session in its slot; starting a session on any path checks that slot, and
//! closing or removing the store nulls the session's handle.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lockbox_core::{Handle, KeyMethod, ScanParams, StoreSpec};
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::scan::Scan;
use crate::session::{Session, SessionShared};

const CLOSED_STORE: &str = "Cannot start session from closed store";
const SESSION_OPENED: &str = "Session already opened";

#[derive(Debug)]
struct StoreState {
    handle: Option<Handle>,
    session: Option<Arc<SessionShared>>,
}

/// State shared between a store and the sessions it created.
#[derive(Debug)]
pub(crate) struct StoreShared {
    uri: String,
    state: Mutex<StoreState>,
}

impl StoreShared {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn handle(&self) -> Option<Handle> {
        self.lock().handle
    }

    /// Claim the slot for `session` ahead of starting it.
    ///
    /// Fails when the store is closed, when `session` is already started or
    /// starting, or when the slot holds another active session.
    pub(crate) fn reserve(&self, session: &Arc<SessionShared>) -> Result<Handle> {
        let mut state = self.lock();
        let handle = state.handle.ok_or_else(|| Error::lifecycle(CLOSED_STORE))?;
        if let Some(current) = &state.session {
            if !Arc::ptr_eq(current, session) && current.is_active() {
                return Err(Error::lifecycle(SESSION_OPENED));
            }
        }
        if !session.begin_start() {
            return Err(Error::lifecycle(SESSION_OPENED));
        }
        state.session = Some(Arc::clone(session));
        Ok(handle)
    }

    /// Put a detached session in the slot unless an active one holds it.
    pub(crate) fn adopt(&self, session: &Arc<SessionShared>) {
        let mut state = self.lock();
        if !state.session.as_ref().is_some_and(|s| s.is_active()) {
            state.session = Some(Arc::clone(session));
        }
    }

    /// Empty the slot if `session` holds it.
    pub(crate) fn release(&self, session: &Arc<SessionShared>) {
        let mut state = self.lock();
        if state
            .session
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            state.session = None;
        }
    }

    /// Null the store handle and the slot's session handle.
    ///
    /// Returns the store handle and the handle of a session that was
    /// started, which the caller must still close in the engine.
    fn detach(&self) -> (Option<Handle>, Option<Handle>) {
        let mut state = self.lock();
        let session = state.session.take().and_then(|session| {
            let handle = session.handle();
            session.clear();
            handle
        });
        (state.handle.take(), session)
    }
}

/// An open (or closed) store.
#[derive(Debug, Clone)]
pub struct Store {
    client: Client,
    shared: Arc<StoreShared>,
}

impl Store {
    fn new(client: &Client, uri: &str, handle: Handle) -> Self {
        Self {
            client: client.clone(),
            shared: Arc::new(StoreShared {
                uri: uri.to_owned(),
                state: Mutex::new(StoreState {
                    handle: Some(handle),
                    session: None,
                }),
            }),
        }
    }

    /// Create a new store at `uri`.
    ///
    /// With `recreate`, an existing store at the same location is replaced.
    pub async fn provision(
        client: &Client,
        uri: &str,
        key_method: KeyMethod,
        pass_key: Option<&str>,
        profile: Option<&str>,
        recreate: bool,
    ) -> Result<Self> {
        let spec = StoreSpec {
            uri,
            key_method: Some(key_method.as_str()),
            pass_key,
            profile,
        };
        let handle: Handle = client
            .call("store_provision", |engine, cb, id| {
                engine.store_provision(spec, recreate, cb, id)
            })
            .await?;
        info!(%handle, "provisioned store");
        Ok(Self::new(client, uri, handle))
    }

    /// Open an existing store. A `key_method` of `None` accepts whichever
    /// method the store was provisioned with.
    pub async fn open(
        client: &Client,
        uri: &str,
        key_method: Option<KeyMethod>,
        pass_key: Option<&str>,
        profile: Option<&str>,
    ) -> Result<Self> {
        let spec = StoreSpec {
            uri,
            key_method: key_method.map(KeyMethod::as_str),
            pass_key,
            profile,
        };
        let handle: Handle = client
            .call("store_open", |engine, cb, id| engine.store_open(spec, cb, id))
            .await?;
        info!(%handle, "opened store");
        Ok(Self::new(client, uri, handle))
    }

    /// Produce a raw store key for [`KeyMethod::Raw`], derived from `seed`
    /// when given.
    pub fn generate_raw_key(client: &Client, seed: Option<&[u8]>) -> Result<String> {
        client.read(client.engine().store_generate_raw_key(seed))
    }

    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    pub fn handle(&self) -> Option<Handle> {
        self.shared.handle()
    }

    pub fn is_closed(&self) -> bool {
        self.handle().is_none()
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn shared(&self) -> &Arc<StoreShared> {
        &self.shared
    }

    fn require(&self, message: &str) -> Result<Handle> {
        self.handle().ok_or_else(|| Error::lifecycle(message))
    }

    /// Detach from the engine, rolling back a session left open in the slot.
    async fn teardown(&self) -> Option<Handle> {
        let (store, session) = self.shared.detach();
        if let Some(session) = session {
            let closed = self
                .client
                .call::<(), _>("session_close", |engine, cb, id| {
                    engine.session_close(session, false, cb, id)
                })
                .await;
            match closed {
                Ok(()) => debug!(%session, "rolled back session of closing store"),
                Err(err) => warn!(%session, error = %err, "failed to release session"),
            }
        }
        store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a session, or a transaction when `as_transaction` is set.
    pub async fn start_session(&self, profile: Option<&str>, as_transaction: bool) -> Result<Session> {
        let session = Session::detached(self, profile, as_transaction);
        session.start().await?;
        Ok(session)
    }

    /// A session that is not yet started.
    pub fn create_session(&self, profile: Option<&str>) -> Session {
        let session = Session::detached(self, profile, false);
        self.shared.adopt(session.shared());
        session
    }

    /// A transaction that is not yet started.
    pub fn create_transaction(&self, profile: Option<&str>) -> Session {
        let session = Session::detached(self, profile, true);
        self.shared.adopt(session.shared());
        session
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Scans
    // ─────────────────────────────────────────────────────────────────────────

    /// Start a paged read over `category`. A `limit` of `-1` is unbounded.
    pub async fn start_scan(
        &self,
        category: &str,
        tag_filter: Option<&str>,
        offset: i64,
        limit: i64,
        profile: Option<&str>,
    ) -> Result<Scan> {
        let store = self.require("Cannot start scan from closed store")?;
        let params = ScanParams {
            profile: profile.map(str::to_owned),
            category: category.to_owned(),
            tag_filter: tag_filter.map(str::to_owned),
            offset,
            limit,
        };
        let handle: Handle = self
            .client
            .call("scan_start", |engine, cb, id| {
                engine.scan_start(store, &params, cb, id)
            })
            .await?;
        Ok(Scan::new(&self.client, handle, store, params))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profiles and keys
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a profile, named by the engine when `profile` is `None`.
    pub async fn create_profile(&self, profile: Option<&str>) -> Result<String> {
        let store = self.require("Cannot create profile for closed store")?;
        self.client
            .call("store_create_profile", |engine, cb, id| {
                engine.store_create_profile(store, profile, cb, id)
            })
            .await
    }

    /// The name of this store's default profile.
    pub async fn get_profile_name(&self) -> Result<String> {
        let store = self.require("Cannot get profile name for closed store")?;
        self.client
            .call("store_get_profile_name", |engine, cb, id| {
                engine.store_get_profile_name(store, cb, id)
            })
            .await
    }

    /// Remove a profile and its records. Returns whether it existed.
    pub async fn remove_profile(&self, profile: &str) -> Result<bool> {
        let store = self.require("Cannot remove profile for closed store")?;
        self.client
            .call("store_remove_profile", |engine, cb, id| {
                engine.store_remove_profile(store, profile, cb, id)
            })
            .await
    }

    /// Replace the store key.
    pub async fn rekey(&self, key_method: KeyMethod, pass_key: Option<&str>) -> Result<()> {
        let store = self.require("Cannot rekey closed store")?;
        self.client
            .call::<(), _>("store_rekey", |engine, cb, id| {
                engine.store_rekey(store, Some(key_method.as_str()), pass_key, cb, id)
            })
            .await?;
        info!(handle = %store, method = %key_method, "rekeyed store");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Teardown
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove the backing store at this store's URI.
    ///
    /// When something was removed, this store and its session are closed.
    pub async fn remove(&self) -> Result<bool> {
        let removed = self.client.remove_store(&self.shared.uri).await?;
        if !removed {
            return Ok(false);
        }
        if let Some(handle) = self.teardown().await {
            debug!(%handle, "store removed while open");
            let closed: Result<()> = self
                .client
                .call("store_close", |engine, cb, id| engine.store_close(handle, cb, id))
                .await;
            if let Err(err) = closed {
                warn!(%handle, error = %err, "failed to release removed store");
            }
        }
        Ok(true)
    }

    /// Close the store, rolling back and nulling its session, and optionally
    /// remove it.
    ///
    /// Returns whether the backing store was removed; always `false` when
    /// `remove` is not set. Closing an already closed store makes no close
    /// call.
    pub async fn close(&self, remove: bool) -> Result<bool> {
        if let Some(handle) = self.teardown().await {
            self.client
                .call::<(), _>("store_close", |engine, cb, id| {
                    engine.store_close(handle, cb, id)
                })
                .await?;
            info!(%handle, "closed store");
        }
        if remove {
            self.client.remove_store(&self.shared.uri).await
        } else {
            Ok(false)
        }
    }
}
