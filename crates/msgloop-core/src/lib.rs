//! Thread-affine invocation executor.
//!
//! This crate provides:
//! - [`Executor`]: owns one dedicated thread running a FIFO message loop
//! - Synchronous marshaling with [`Executor::invoke`] and [`Executor::call`]
//! - Asynchronous marshaling with [`Executor::begin_invoke`] / [`Executor::end_invoke`]
//! - Loop lifecycle notifications via [`LoopObserver`] or closures
//! - [`LoopConfig`] for thread naming and sizing
//!
//! Calls from the owning thread run inline; calls from anywhere else are
//! queued and executed one at a time, in post order, on the owning thread.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod sync;
pub mod worker;

pub use config::LoopConfig;
pub use dispatch::{LoopId, Outcome, current_loop_id, is_loop_thread};
pub use error::{Error, InvokeError, Result};
pub use invoke::{AsyncHandle, AsyncState, Executor, ExecutorBuilder};
pub use sync::ResetEvent;
pub use worker::{BoxError, LoopObserver, StartupHook};
