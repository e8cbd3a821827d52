//! The client: an engine, a callback registry and the completion callback
//! that connects them.

use std::sync::Arc;
use std::time::Duration;

use lockbox_bridge::CallbackRegistry;
use lockbox_core::{
    CallbackId, CompletionFn, Engine, ErrorReport, FromPayload, LogSink, Payload, StatusCode,
    SyncResult,
};
use lockbox_engine::EmbeddedEngine;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Configuration for a [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Give up on a completion after this long. `None` waits forever.
    pub call_timeout: Option<Duration>,
    /// Engine log level to apply at construction.
    pub max_log_level: Option<i32>,
    /// Forward engine log records into `tracing`.
    pub default_logger: bool,
}

impl ClientConfig {
    pub fn with_call_timeout(mut self, after: Duration) -> Self {
        self.call_timeout = Some(after);
        self
    }

    pub fn with_max_log_level(mut self, level: i32) -> Self {
        self.max_log_level = Some(level);
        self
    }

    pub fn with_default_logger(mut self, enabled: bool) -> Self {
        self.default_logger = enabled;
        self
    }
}

struct Inner {
    engine: Arc<dyn Engine>,
    registry: CallbackRegistry<Error>,
    completion: CompletionFn,
    config: ClientConfig,
}

/// Entry point to an engine.
///
/// Cheap to clone; every [`Store`](crate::Store), [`Session`](crate::Session)
/// and result list keeps a clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.inner.registry)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client over `engine` with its own callback registry.
    pub fn new(engine: Arc<dyn Engine>, config: ClientConfig) -> Result<Self> {
        Self::with_registry(engine, CallbackRegistry::new(), config)
    }

    /// Create a client over the embedded SQLite engine.
    pub fn embedded(config: ClientConfig) -> Result<Self> {
        Self::new(Arc::new(EmbeddedEngine::new()), config)
    }

    /// Create a client that shares `registry` with other clients.
    pub fn with_registry(
        engine: Arc<dyn Engine>,
        registry: CallbackRegistry<Error>,
        config: ClientConfig,
    ) -> Result<Self> {
        let completion = completion_fn(Arc::clone(&engine), registry.clone());
        let client = Self {
            inner: Arc::new(Inner {
                engine,
                registry,
                completion,
                config,
            }),
        };

        let config = &client.inner.config;
        if config.default_logger {
            client.set_default_logger()?;
        }
        if let Some(level) = config.max_log_level {
            client.set_max_log_level(level)?;
        }
        Ok(client)
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.inner.engine
    }

    pub fn registry(&self) -> &CallbackRegistry<Error> {
        &self.inner.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Housekeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// The engine's version string.
    pub fn version(&self) -> String {
        self.inner.engine.version()
    }

    /// Release every engine-owned object. Client-side handles are left as
    /// they are; using them afterwards yields engine `Input` errors.
    pub fn terminate(&self) {
        debug!("terminating engine");
        self.inner.engine.terminate();
    }

    /// The engine's last error on the calling thread.
    pub fn current_error(&self) -> Result<ErrorReport> {
        ErrorReport::parse(&self.inner.engine.current_error()).map_err(|_| Error::UnknownErrorCode)
    }

    /// Remove the store at `uri` without opening it.
    pub async fn remove_store(&self, uri: &str) -> Result<bool> {
        self.call("store_remove", |engine, cb, id| engine.store_remove(uri, cb, id))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    pub fn set_custom_logger(&self, sink: Arc<dyn LogSink>, max_level: i32) -> Result<()> {
        self.check(self.inner.engine.set_custom_logger(sink, max_level))
    }

    pub fn clear_custom_logger(&self) {
        self.inner.engine.clear_custom_logger();
    }

    /// Forward engine log records into `tracing`.
    pub fn set_default_logger(&self) -> Result<()> {
        self.check(self.inner.engine.set_default_logger())
    }

    /// Set the engine's maximum log level; `-1` leaves it unchanged.
    pub fn set_max_log_level(&self, max_level: i32) -> Result<()> {
        self.check(self.inner.engine.set_max_log_level(max_level))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Engine calls
    // ─────────────────────────────────────────────────────────────────────────

    /// Issue one asynchronous engine call and await its completion.
    ///
    /// The waiter is registered before `issue` runs. When the engine rejects
    /// the call synchronously the waiter is abandoned and the engine's
    /// current error is returned instead.
    pub(crate) async fn call<T, F>(&self, op: &'static str, issue: F) -> Result<T>
    where
        T: FromPayload,
        F: FnOnce(&dyn Engine, CompletionFn, CallbackId) -> StatusCode,
    {
        let (token, waiter) = self.inner.registry.register::<T>();
        trace!(op, token, "issuing engine call");

        let status = issue(
            self.inner.engine.as_ref(),
            Arc::clone(&self.inner.completion),
            token,
        );
        if !status.is_success() {
            let err = Error::from_engine(self.inner.engine.as_ref(), status);
            waiter.abandon();
            debug!(op, token, error = %err, "engine rejected call");
            return Err(err);
        }

        let outcome = match self.inner.config.call_timeout {
            Some(after) => waiter.wait_timeout(after).await,
            None => waiter.wait().await,
        };
        if let Err(err) = &outcome {
            debug!(op, token, error = %err, "engine call failed");
        }
        outcome
    }

    /// Convert the status of a synchronous engine call.
    pub(crate) fn check(&self, status: StatusCode) -> Result<()> {
        if status.is_success() {
            Ok(())
        } else {
            Err(Error::from_engine(self.inner.engine.as_ref(), status))
        }
    }

    /// Convert the outcome of a synchronous engine accessor.
    pub(crate) fn read<T>(&self, result: SyncResult<T>) -> Result<T> {
        result.map_err(|status| Error::from_engine(self.inner.engine.as_ref(), status))
    }
}

/// The single completion callback handed to every engine call.
///
/// A failed status is turned into an error here, on the completing thread,
/// since that is the thread whose last error describes it.
fn completion_fn(engine: Arc<dyn Engine>, registry: CallbackRegistry<Error>) -> CompletionFn {
    Arc::new(move |token: CallbackId, status: StatusCode, payload: Payload| {
        let outcome = if status.is_success() {
            Ok(payload)
        } else {
            Err(Error::from_engine(engine.as_ref(), status))
        };
        if let Err(err) = registry.resolve(token, outcome) {
            warn!(token, %status, error = %err, "dropping completion");
        }
    })
}
