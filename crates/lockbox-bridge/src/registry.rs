//! The pending-callback table.
//!
//! Each outstanding engine call owns one entry, keyed by a correlation token
//! drawn from a process-wide sequence. The entry is inserted before the
//! engine call is issued and removed exactly once: by the completion, by an
//! abandon after a synchronous failure, or by a timeout.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lockbox_core::{CallbackId, FromPayload, Payload};
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::BridgeError;

/// Tokens are unique across every registry in the process.
static NEXT_TOKEN: AtomicI64 = AtomicI64::new(1);

type Deliver<E> = Box<dyn FnOnce(std::result::Result<Payload, E>) + Send>;

struct Inner<E> {
    pending: Mutex<HashMap<CallbackId, Deliver<E>>>,
}

/// Maps correlation tokens to the waiters expecting their completion.
///
/// `E` is the caller's error type. Engine failures are delivered as `E`
/// directly; bridge failures are converted through `From<BridgeError>`.
pub struct CallbackRegistry<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for CallbackRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for CallbackRegistry<E>
where
    E: From<BridgeError> + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for CallbackRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("pending", &self.lock().len())
            .finish()
    }
}

impl<E> CallbackRegistry<E> {
    fn lock(&self) -> MutexGuard<'_, HashMap<CallbackId, Deliver<E>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of tokens awaiting a completion.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Whether `token` is still awaiting a completion.
    pub fn is_pending(&self, token: CallbackId) -> bool {
        self.lock().contains_key(&token)
    }

    /// Discard the waiter for `token` without delivering anything.
    ///
    /// Used when the engine rejected a call synchronously and will never
    /// complete it. The waiter, if still held, observes
    /// [`BridgeError::Dropped`]. Returns whether the token was pending.
    pub fn abandon(&self, token: CallbackId) -> bool {
        let removed = self.lock().remove(&token);
        if removed.is_some() {
            trace!(token, "abandoned callback token");
        }
        removed.is_some()
    }
}

impl<E> CallbackRegistry<E>
where
    E: From<BridgeError> + Send + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Allocate a token and register a waiter for it.
    ///
    /// Must be called before the engine call that carries the token is
    /// issued, so that a completion arriving before the engine call even
    /// returns still finds its waiter.
    pub fn register<T: FromPayload>(&self) -> (CallbackId, Waiter<T, E>) {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel::<std::result::Result<T, E>>();

        let deliver: Deliver<E> = Box::new(move |outcome| {
            let typed = outcome.and_then(|payload| {
                T::from_payload(payload).map_err(|found| {
                    E::from(BridgeError::PayloadMismatch {
                        token,
                        expected: T::FAMILY,
                        found: found.family(),
                    })
                })
            });
            // The receiver is gone if the waiter itself was dropped.
            let _ = tx.send(typed);
        });

        self.lock().insert(token, deliver);
        trace!(token, family = T::FAMILY, "registered callback token");

        (
            token,
            Waiter {
                token,
                rx,
                registry: self.clone(),
                _marker: PhantomData,
            },
        )
    }

    /// Deliver the outcome for `token` to its waiter.
    ///
    /// Removal and delivery happen exactly once; any later resolution of the
    /// same token is reported as [`BridgeError::UnknownToken`].
    pub fn resolve(
        &self,
        token: CallbackId,
        outcome: std::result::Result<Payload, E>,
    ) -> crate::Result<()> {
        let deliver = self
            .lock()
            .remove(&token)
            .ok_or(BridgeError::UnknownToken(token))?;
        trace!(token, ok = outcome.is_ok(), "resolved callback token");
        deliver(outcome);
        Ok(())
    }
}

/// The receiving half of a registered token.
#[must_use = "a waiter does nothing unless awaited"]
pub struct Waiter<T, E> {
    token: CallbackId,
    rx: oneshot::Receiver<std::result::Result<T, E>>,
    registry: CallbackRegistry<E>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, E> std::fmt::Debug for Waiter<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("token", &self.token).finish()
    }
}

impl<T, E> Waiter<T, E>
where
    T: Send + 'static,
    E: From<BridgeError> + Send + 'static,
{
    /// The correlation token to hand to the engine.
    pub fn token(&self) -> CallbackId {
        self.token
    }

    /// Suspend until the completion arrives.
    pub async fn wait(self) -> std::result::Result<T, E> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::Dropped(self.token).into()),
        }
    }

    /// Suspend until the completion arrives or `after` elapses.
    ///
    /// On expiry the token is abandoned; a completion arriving later is
    /// rejected as an unknown token.
    pub async fn wait_timeout(self, after: Duration) -> std::result::Result<T, E> {
        let Waiter {
            token,
            rx,
            registry,
            ..
        } = self;

        match tokio::time::timeout(after, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::Dropped(token).into()),
            Err(_) => {
                registry.abandon(token);
                Err(BridgeError::TimedOut { token, after }.into())
            }
        }
    }

    /// Give up on the completion. Returns whether the token was still pending.
    pub fn abandon(self) -> bool {
        self.registry.abandon(self.token)
    }
}
