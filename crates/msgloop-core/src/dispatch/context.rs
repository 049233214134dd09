//! Thread-local scheduling context.
//!
//! The loop thread installs its [`LoopId`] here at startup; any code running on
//! that thread (including marshaled calls) can ask which loop owns it.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_LOOP: Cell<Option<LoopId>> = const { Cell::new(None) };
}

/// Process-unique identifier of a message loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(u64);

impl LoopId {
    pub(crate) fn next() -> Self {
        Self(NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for LoopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "loop#{}", self.0)
    }
}

/// The loop owning the current thread, if any.
pub fn current_loop_id() -> Option<LoopId> {
    CURRENT_LOOP.with(Cell::get)
}

/// Whether the current thread is the owning thread of some message loop.
pub fn is_loop_thread() -> bool {
    current_loop_id().is_some()
}

/// Installs a loop id for the current thread; uninstalls it on drop.
pub(crate) struct ContextGuard {
    previous: Option<LoopId>,
}

impl ContextGuard {
    pub(crate) fn install(id: LoopId) -> Self {
        let previous = CURRENT_LOOP.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|current| current.set(self.previous));
    }
}
