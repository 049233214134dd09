//! Posting side of the message loop.
//!
//! Caller threads never touch the loop directly; they hold a [`Dispatcher`]
//! (a cloneable sender plus the loop's shared state) and push [`Message`]s
//! into a FIFO channel that only the loop thread consumes.
//!
//! ```text
//! caller thread                    loop thread
//!     │                                │
//!     ├── Dispatcher::send ──┐         │
//!     │     (blocks)         └─ Message::Call ─► PendingCall::run
//!     │                                │             │
//!     ◄──────── Completion ◄───────────┴─────────────┘
//! ```

mod context;
mod pending;

use std::sync::Arc;
use std::sync::mpsc::Sender;

pub use context::{LoopId, current_loop_id, is_loop_thread};
pub use pending::Outcome;

pub(crate) use context::ContextGuard;
pub(crate) use pending::{Job, PendingCall, run_guarded};

use crate::error::{Error, Result};
use crate::worker::LoopShared;

/// Items consumed by the loop, strictly in the order they were sent.
pub(crate) enum Message {
    /// A call whose poster is waiting for the outcome.
    Call(PendingCall),
    /// Fire-and-forget work. A panic here escapes the loop.
    Post(Job),
    /// Stop after everything queued before it has run.
    Quit,
    /// No-op used to wake a blocked loop so it notices an abort.
    Wake,
}

/// Cloneable posting handle for one loop.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    tx: Sender<Message>,
    shared: Arc<LoopShared>,
}

impl Dispatcher {
    pub(crate) fn new(tx: Sender<Message>, shared: Arc<LoopShared>) -> Self {
        Self { tx, shared }
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared> {
        &self.shared
    }

    fn closed_error(&self) -> Error {
        Error::Dispatch(format!("{} is no longer running", self.shared.id()))
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        if self.shared.is_closed() {
            return Err(self.closed_error());
        }
        self.tx.send(message).map_err(|_| self.closed_error())
    }

    /// Post `f` and block until the loop has run it.
    pub(crate) fn send<T, E, F>(&self, f: F) -> Outcome<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (call, completion) = PendingCall::new(self.shared.next_call_id(), f);
        tracing::trace!("Posting call {} to {}", call.id(), self.shared.id());
        self.enqueue(Message::Call(call))?;
        completion.wait()
    }

    /// Queue `job` without waiting for it.
    pub(crate) fn post(&self, job: Job) -> Result<()> {
        self.enqueue(Message::Post(job))
    }

    /// Stop accepting work and let the loop drain what is already queued.
    pub(crate) fn quit(&self) {
        if self.shared.close() {
            tracing::debug!("Graceful shutdown requested for {}", self.shared.id());
            let _ = self.tx.send(Message::Quit);
        }
    }

    /// Stop accepting work and make the loop drop what is queued.
    pub(crate) fn abort(&self) {
        self.shared.close();
        if self.shared.abort() {
            tracing::debug!("Disposal requested for {}", self.shared.id());
            // The loop may already be gone, in which case there is nothing to wake.
            let _ = self.tx.send(Message::Wake);
        }
    }
}
