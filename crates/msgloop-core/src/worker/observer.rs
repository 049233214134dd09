//! Loop lifecycle notifications.
//!
//! Observers are registered per executor and fired from the loop thread when
//! it exits: the error notification first (only for a loop failure), then the
//! stopped notification.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use crate::dispatch::LoopId;
use crate::error::{Error, panic_message};

/// Callback trait for loop lifecycle events.
pub trait LoopObserver: Send + Sync {
    /// Called once when an unhandled failure escapes the loop.
    fn on_thread_error(&self, _loop_id: LoopId, _error: &Error) {}

    /// Called once when the loop exits, for any reason.
    fn on_thread_stopped(&self, _loop_id: LoopId) {}
}

struct ErrorFn<F>(F);

impl<F> LoopObserver for ErrorFn<F>
where
    F: Fn(&Error) + Send + Sync,
{
    fn on_thread_error(&self, _loop_id: LoopId, error: &Error) {
        (self.0)(error)
    }
}

struct StoppedFn<F>(F);

impl<F> LoopObserver for StoppedFn<F>
where
    F: Fn() + Send + Sync,
{
    fn on_thread_stopped(&self, _loop_id: LoopId) {
        (self.0)()
    }
}

/// Wrap a closure as an error-only observer.
pub(crate) fn error_observer<F>(f: F) -> Arc<dyn LoopObserver>
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    Arc::new(ErrorFn(f))
}

/// Wrap a closure as a stopped-only observer.
pub(crate) fn stopped_observer<F>(f: F) -> Arc<dyn LoopObserver>
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(StoppedFn(f))
}

/// Registered observers of one loop.
#[derive(Default)]
pub(crate) struct Observers {
    list: Mutex<Vec<Arc<dyn LoopObserver>>>,
}

impl Observers {
    pub(crate) fn add(&self, observer: Arc<dyn LoopObserver>) {
        self.list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.list.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // Snapshot so observers may register further observers without deadlocking.
    fn snapshot(&self) -> Vec<Arc<dyn LoopObserver>> {
        self.list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn notify_error(&self, loop_id: LoopId, error: &Error) {
        for observer in self.snapshot() {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_thread_error(loop_id, error)));
            if let Err(e) = result {
                tracing::warn!(
                    "Error observer for {} panicked: {}",
                    loop_id,
                    panic_message(e.as_ref())
                );
            }
        }
    }

    pub(crate) fn notify_stopped(&self, loop_id: LoopId) {
        for observer in self.snapshot() {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_thread_stopped(loop_id)));
            if let Err(e) = result {
                tracing::warn!(
                    "Stopped observer for {} panicked: {}",
                    loop_id,
                    panic_message(e.as_ref())
                );
            }
        }
    }
}
