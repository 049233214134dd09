//! Packaged calls and their one-shot completion slots.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc::{self, Receiver, SyncSender};

use crate::error::{Error, InvokeError, panic_message};

/// Type-erased unit of work executed by the loop.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a marshaled call: its value, its own error, or an executor error.
pub type Outcome<T, E> = std::result::Result<T, InvokeError<E>>;

/// Run a callable, turning a panic into [`Error::Panicked`].
pub(crate) fn run_guarded<T, E, F>(f: F) -> Outcome<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(InvokeError::Call(e)),
        Err(payload) => Err(Error::Panicked(panic_message(payload.as_ref())).into()),
    }
}

/// One marshaled invocation in flight.
///
/// The job writes its outcome into a single-slot channel exactly once. If the
/// call is dropped unexecuted the sender goes with it and the waiting
/// [`Completion`] observes [`Error::Abandoned`].
pub(crate) struct PendingCall {
    id: u64,
    job: Job,
}

impl PendingCall {
    /// Package `f` as a call with id `id`, returning the call and its completion.
    pub(crate) fn new<T, E, F>(id: u64, f: F) -> (Self, Completion<T, E>)
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let call = Self {
            id,
            job: Box::new(move || complete(&tx, run_guarded(f))),
        };
        (call, Completion { rx })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Execute on the current thread, publishing the outcome.
    pub(crate) fn run(self) {
        (self.job)()
    }
}

fn complete<T, E>(tx: &SyncSender<Outcome<T, E>>, outcome: Outcome<T, E>) {
    // The poster may have given up waiting; nobody is left to tell.
    let _ = tx.send(outcome);
}

/// Receiving side of a [`PendingCall`].
pub(crate) struct Completion<T, E> {
    rx: Receiver<Outcome<T, E>>,
}

impl<T, E> Completion<T, E> {
    /// Block until the call completes or is dropped by the loop.
    pub(crate) fn wait(self) -> Outcome<T, E> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(Error::Abandoned.into()))
    }
}
