//! Blocking synchronization primitives.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A manual-reset event.
///
/// Once [`set`](ResetEvent::set), every current and future waiter is released
/// until the event is [`reset`](ResetEvent::reset). Clones share the same event.
///
/// # Example
///
/// ```
/// use msgloop_core::ResetEvent;
/// use std::thread;
///
/// let event = ResetEvent::new(false);
/// let signaller = event.clone();
///
/// let handle = thread::spawn(move || signaller.set());
/// event.wait();
/// assert!(event.is_set());
/// handle.join().unwrap();
/// ```
#[derive(Clone, Default)]
pub struct ResetEvent {
    inner: Arc<EventInner>,
}

#[derive(Default)]
struct EventInner {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl EventInner {
    // Nothing can panic while the flag is held, so a poisoned lock still holds a valid bool.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.signaled.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ResetEvent {
    /// Create a new event in the given state.
    pub fn new(signaled: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                signaled: Mutex::new(signaled),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Signal the event, releasing all waiters.
    pub fn set(&self) {
        let mut signaled = self.inner.lock();
        *signaled = true;
        self.inner.condvar.notify_all();
    }

    /// Return the event to the unsignaled state.
    pub fn reset(&self) {
        *self.inner.lock() = false;
    }

    /// Whether the event is currently signaled.
    pub fn is_set(&self) -> bool {
        *self.inner.lock()
    }

    /// Block until the event is signaled.
    pub fn wait(&self) {
        let guard = self.inner.lock();
        let _guard = self
            .inner
            .condvar
            .wait_while(guard, |signaled| !*signaled)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block until the event is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the event was signaled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.inner.lock();

        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .condvar
                .wait_timeout(signaled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            signaled = guard;
        }

        true
    }
}

impl std::fmt::Debug for ResetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetEvent")
            .field("signaled", &self.is_set())
            .finish()
    }
}
