//! Handles for calls started with `begin_invoke`.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crate::dispatch::{LoopId, Outcome};
use crate::error::{Error, InvokeError};
use crate::sync::ResetEvent;

/// Caller-supplied opaque state attached to an [`AsyncHandle`].
pub type AsyncState = Arc<dyn Any + Send + Sync>;

struct HandleState<T, E> {
    outcome: Mutex<Option<Outcome<T, E>>>,
    completed: AtomicBool,
    /// Created on first request; set on completion.
    signal: OnceLock<ResetEvent>,
}

impl<T, E> HandleState<T, E> {
    // Outcomes are written whole, so a poisoned slot is still consistent.
    fn lock(&self) -> MutexGuard<'_, Option<Outcome<T, E>>> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the outcome. Later publications are ignored.
    fn publish(&self, outcome: Outcome<T, E>) -> bool {
        let mut slot = self.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.completed.store(true, Ordering::Release);
        if let Some(signal) = self.signal.get() {
            signal.set();
        }
        true
    }

    fn signal(&self) -> ResetEvent {
        // Taking the slot lock orders lazy creation against `publish`.
        let slot = self.lock();
        self.signal
            .get_or_init(|| ResetEvent::new(slot.is_some()))
            .clone()
    }
}

/// Pending or completed result of a call started with
/// [`Executor::begin_invoke`](crate::Executor::begin_invoke).
///
/// `is_completed` flips from `false` to `true` exactly once. Reading the
/// result blocks until then; a failed call yields its failure on every read.
pub struct AsyncHandle<T, E> {
    state: Arc<HandleState<T, E>>,
    loop_id: LoopId,
    user_state: Option<AsyncState>,
}

/// Write side of an [`AsyncHandle`], owned by the relay.
pub(crate) struct Completer<T, E> {
    state: Arc<HandleState<T, E>>,
    published: bool,
}

impl<T, E> AsyncHandle<T, E> {
    pub(crate) fn new(loop_id: LoopId, user_state: Option<AsyncState>) -> (Self, Completer<T, E>) {
        let state = Arc::new(HandleState {
            outcome: Mutex::new(None),
            completed: AtomicBool::new(false),
            signal: OnceLock::new(),
        });
        let handle = Self {
            state: state.clone(),
            loop_id,
            user_state,
        };
        (
            handle,
            Completer {
                state,
                published: false,
            },
        )
    }

    /// Whether the call has finished, successfully or not.
    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::Acquire)
    }

    /// Mirrors [`is_completed`](Self::is_completed); synchronous completion is not tracked.
    pub fn completed_synchronously(&self) -> bool {
        self.is_completed()
    }

    /// Wait primitive that becomes signaled when the call completes.
    ///
    /// Created on first use.
    pub fn async_wait_handle(&self) -> ResetEvent {
        self.state.signal()
    }

    /// The loop this call was sent to.
    pub fn loop_id(&self) -> LoopId {
        self.loop_id
    }

    /// State passed to `begin_invoke_with_state`, if any.
    pub fn state(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.user_state.as_deref()
    }

    /// State passed to `begin_invoke_with_state`, downcast to `S`.
    pub fn state_as<S: Any>(&self) -> Option<&S> {
        self.state().and_then(|s| s.downcast_ref::<S>())
    }

    /// Block until the call completes.
    pub fn wait(&self) {
        if !self.is_completed() {
            self.async_wait_handle().wait();
        }
    }

    /// Block until the call completes or `timeout` elapses.
    ///
    /// Returns `true` if the call completed. The call keeps running either way.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.is_completed() || self.async_wait_handle().wait_timeout(timeout)
    }

    /// Block until completion and return a copy of the outcome.
    pub fn result(&self) -> Outcome<T, E>
    where
        T: Clone,
        E: Clone,
    {
        self.wait();
        self.state
            .lock()
            .clone()
            .unwrap_or_else(|| Err(Error::Abandoned.into()))
    }

    /// Block until completion and take the outcome.
    pub fn into_result(self) -> Outcome<T, E> {
        self.wait();
        self.state
            .lock()
            .take()
            .unwrap_or_else(|| Err(Error::Abandoned.into()))
    }
}

impl<T, E> std::fmt::Debug for AsyncHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncHandle")
            .field("loop_id", &self.loop_id)
            .field("is_completed", &self.is_completed())
            .field("has_state", &self.user_state.is_some())
            .finish()
    }
}

impl<T, E> Completer<T, E> {
    pub(crate) fn complete(mut self, outcome: Outcome<T, E>) {
        self.published = self.state.publish(outcome);
    }
}

impl<T, E> Drop for Completer<T, E> {
    fn drop(&mut self) {
        if self.published {
            return;
        }
        // The relay never got to publish.
        self.state.publish(Err(InvokeError::Executor(Error::Dispatch(
            "relay ended before publishing an outcome".to_string(),
        ))));
    }
}
