//! Thread-affine executor: the public marshaling surface.
//!
//! An [`Executor`] owns one loop thread. Work submitted from any other thread
//! is marshaled onto it; work submitted from the loop thread itself runs
//! inline.
//!
//! # Example
//!
//! ```
//! use msgloop_core::Executor;
//! use std::thread;
//!
//! let executor = Executor::new().unwrap();
//! let owner = executor.thread_id();
//!
//! let ran_on = thread::scope(|s| {
//!     s.spawn(|| executor.call(|| thread::current().id()).unwrap())
//!         .join()
//!         .unwrap()
//! });
//! assert_eq!(ran_on, owner);
//!
//! let handle = executor.begin_invoke(|| Err::<(), _>("x"));
//! assert_eq!(executor.end_invoke(&handle).unwrap_err().to_string(), "x");
//! ```

mod handle;

use std::any::Any;
use std::convert::Infallible;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::time::Duration;

pub use handle::{AsyncHandle, AsyncState};

use crate::config::LoopConfig;
use crate::dispatch::{Dispatcher, LoopId, Outcome, run_guarded};
use crate::error::{Error, InvokeError, Result};
use crate::worker::{self, BoxError, LoopObserver, LoopShared, StartupHook};

/// Owns a dedicated loop thread and marshals calls onto it.
///
/// Dropping the executor disposes it.
pub struct Executor {
    dispatcher: Dispatcher,
    thread: Thread,
    config: LoopConfig,
}

impl Executor {
    /// Start an executor with the default configuration.
    ///
    /// Blocks until the loop thread is ready to accept work.
    pub fn new() -> Result<Self> {
        Self::builder().spawn()
    }

    /// Start an executor with the given configuration.
    pub fn with_config(config: LoopConfig) -> Result<Self> {
        Self::builder().config(config).spawn()
    }

    /// Builder for observers and startup hooks that must exist before the loop runs.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Identifier of the owned loop.
    pub fn loop_id(&self) -> LoopId {
        self.dispatcher.shared().id()
    }

    /// Identity of the owning thread.
    pub fn thread_id(&self) -> ThreadId {
        self.thread.id()
    }

    /// Name of the owning thread.
    pub fn thread_name(&self) -> Option<&str> {
        self.thread.name()
    }

    /// Configuration the executor was started with.
    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Whether the calling thread must marshal to reach the owning thread.
    pub fn invoke_required(&self) -> bool {
        thread::current().id() != self.thread.id()
    }

    /// Whether the loop is still processing messages.
    pub fn is_running(&self) -> bool {
        self.dispatcher.shared().is_running()
    }

    /// Run `f` on the owning thread and return its outcome.
    ///
    /// On the owning thread `f` runs inline. Elsewhere the caller blocks until
    /// the loop has run it. Errors returned by `f` come back as
    /// [`InvokeError::Call`]; panics as [`Error::Panicked`]. Once the executor
    /// is disposed every call fails with [`Error::Dispatch`], inline ones included.
    pub fn invoke<T, E, F>(&self, f: F) -> Outcome<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        if !self.invoke_required() {
            let shared = self.dispatcher.shared();
            // The call running at disposal may finish, but may not start new work.
            if shared.is_aborted() {
                return Err(Error::Dispatch(format!("{} has been disposed", shared.id())).into());
            }
            return run_guarded(f);
        }
        self.dispatcher.send(f)
    }

    /// [`invoke`](Self::invoke) for closures that cannot fail.
    pub fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.invoke(move || Ok::<T, Infallible>(f()))
            .map_err(|e| match e {
                InvokeError::Executor(e) => e,
                InvokeError::Call(never) => match never {},
            })
    }

    /// Start `f` on the owning thread without blocking the caller.
    ///
    /// A short-lived relay thread performs the blocking [`invoke`](Self::invoke)
    /// and publishes the outcome into the returned handle. If the loop is
    /// already closed the handle is returned completed with [`Error::Dispatch`].
    pub fn begin_invoke<T, E, F>(&self, f: F) -> AsyncHandle<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.begin(f, None)
    }

    /// [`begin_invoke`](Self::begin_invoke) with caller-supplied state attached to the handle.
    pub fn begin_invoke_with_state<T, E, F, S>(&self, f: F, state: S) -> AsyncHandle<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        S: Any + Send + Sync,
    {
        self.begin(f, Some(Arc::new(state)))
    }

    fn begin<T, E, F>(&self, f: F, state: Option<AsyncState>) -> AsyncHandle<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (handle, completer) = AsyncHandle::new(self.loop_id(), state);

        let shared = self.dispatcher.shared();
        if shared.is_closed() {
            completer.complete(Err(Error::Dispatch(format!(
                "{} is no longer running",
                shared.id()
            ))
            .into()));
            return handle;
        }

        let dispatcher = self.dispatcher.clone();
        let spawned = thread::Builder::new()
            .name(self.config.relay_thread_name.clone())
            .spawn(move || completer.complete(dispatcher.send(f)));

        // On failure the closure, and with it the completer, has been dropped,
        // which completes the handle with a dispatch error.
        if let Err(e) = spawned {
            tracing::warn!("Failed to spawn relay thread for {}: {}", self.loop_id(), e);
        }

        handle
    }

    /// Wait for a call started with [`begin_invoke`](Self::begin_invoke) and return its outcome.
    ///
    /// May be called any number of times; each call returns the same outcome.
    /// Waiting on the owning thread for an unfinished call of this executor
    /// would deadlock, so that case fails with [`Error::Dispatch`] instead.
    pub fn end_invoke<T, E>(&self, handle: &AsyncHandle<T, E>) -> Outcome<T, E>
    where
        T: Clone,
        E: Clone,
    {
        if !handle.is_completed() && handle.loop_id() == self.loop_id() && !self.invoke_required() {
            return Err(Error::Dispatch(
                "end_invoke on the loop thread would wait for itself".to_string(),
            )
            .into());
        }
        handle.result()
    }

    /// Queue `f` on the owning thread without waiting for it.
    ///
    /// Nobody observes the outcome: a panic in `f` is a loop failure that
    /// stops the loop and raises the error notification.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.post(Box::new(f))
    }

    /// Register a callback fired when an unhandled failure stops the loop.
    ///
    /// Observers registered after the loop stopped are never called; use
    /// [`ExecutorBuilder::on_thread_error`] to avoid that race.
    pub fn on_thread_error<F>(&self, f: F)
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.add_observer(worker::error_observer(f));
    }

    /// Register a callback fired once when the loop exits.
    pub fn on_thread_stopped<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_observer(worker::stopped_observer(f));
    }

    /// Register a [`LoopObserver`].
    pub fn add_observer(&self, observer: Arc<dyn LoopObserver>) {
        self.dispatcher.shared().observers.add(observer);
    }

    /// Stop after the work already queued has run. New work is rejected.
    pub fn shutdown(&self) {
        self.dispatcher.quit();
    }

    /// Stop the loop without draining it.
    ///
    /// Returns once the loop has been told to stop. The call running right now
    /// finishes; queued calls are dropped and their callers receive
    /// [`Error::Abandoned`]. Later calls fail with [`Error::Dispatch`].
    pub fn dispose(&self) {
        self.dispatcher.abort();
    }

    /// Block until the loop thread has exited and its observers have run.
    pub fn wait_stopped(&self) -> Result<()> {
        if !self.invoke_required() {
            return Err(Error::Dispatch(
                "cannot wait for the loop to stop from its own thread".to_string(),
            ));
        }
        self.dispatcher.shared().stopped().wait();
        Ok(())
    }

    /// [`wait_stopped`](Self::wait_stopped) with a timeout. Returns `true` if the loop stopped.
    pub fn wait_stopped_timeout(&self, timeout: Duration) -> bool {
        if !self.invoke_required() {
            return false;
        }
        self.dispatcher.shared().stopped().wait_timeout(timeout)
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("loop_id", &self.loop_id())
            .field("thread", &self.thread_name())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Configures and starts an [`Executor`].
#[derive(Default)]
pub struct ExecutorBuilder {
    config: LoopConfig,
    observers: Vec<Arc<dyn LoopObserver>>,
    on_start: Option<StartupHook>,
}

impl ExecutorBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Names the owning thread.
    pub fn name(mut self, name: &str) -> Self {
        self.config.thread_name = String::from(name);
        self
    }

    /// Sets the owning thread's stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    /// Runs `f` on the owning thread before the executor is handed out.
    ///
    /// An error or panic makes construction fail with [`Error::Startup`].
    pub fn on_start<F, E>(mut self, f: F) -> Self
    where
        F: FnOnce() -> std::result::Result<(), E> + Send + 'static,
        E: Into<BoxError>,
    {
        self.on_start = Some(Box::new(move || f().map_err(Into::into)));
        self
    }

    /// See [`Executor::on_thread_error`].
    pub fn on_thread_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.observers.push(worker::error_observer(f));
        self
    }

    /// See [`Executor::on_thread_stopped`].
    pub fn on_thread_stopped<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.observers.push(worker::stopped_observer(f));
        self
    }

    /// See [`Executor::add_observer`].
    pub fn observer(mut self, observer: Arc<dyn LoopObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Spawn the loop thread and wait until it is ready.
    pub fn spawn(self) -> Result<Executor> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(LoopShared::new(self.observers));
        let thread = worker::spawn(&self.config, shared.clone(), rx, self.on_start)?;

        tracing::debug!(
            "Executor {} ready on thread {:?}",
            shared.id(),
            thread.name().unwrap_or("<unnamed>")
        );

        Ok(Executor {
            dispatcher: Dispatcher::new(tx, shared),
            thread,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_invoke_inline_on_owning_thread() {
        let executor = Arc::new(Executor::new().unwrap());
        let inner = executor.clone();

        let (required, hopped) = executor
            .call(move || {
                let before = thread::current().id();
                let value = inner.call(|| thread::current().id()).unwrap();
                (inner.invoke_required(), value != before)
            })
            .unwrap();

        assert!(!required);
        assert!(!hopped);
    }

    #[test]
    fn test_invoke_required_from_caller() {
        let executor = Executor::new().unwrap();
        assert!(executor.invoke_required());
        assert_ne!(executor.thread_id(), thread::current().id());
        assert_eq!(executor.thread_name(), Some("msgloop"));
    }

    #[test]
    fn test_call_error_is_preserved() {
        #[derive(Debug, Clone, PartialEq)]
        struct Denied {
            code: u32,
        }

        let executor = Executor::new().unwrap();
        let err = executor.invoke(|| Err::<(), _>(Denied { code: 403 })).unwrap_err();
        assert_eq!(err.into_call(), Some(Denied { code: 403 }));
    }

    #[test]
    fn test_end_invoke_on_loop_thread_does_not_deadlock() {
        let executor = Arc::new(Executor::new().unwrap());
        let inner = executor.clone();

        let outcome = executor
            .call(move || {
                let handle = inner.begin_invoke(|| Ok::<_, String>(1));
                inner.end_invoke(&handle)
            })
            .unwrap();

        assert!(matches!(
            outcome,
            Err(InvokeError::Executor(Error::Dispatch(_)))
        ));
    }

    #[test]
    fn test_builder_name_and_start_hook() {
        let started = Arc::new(AtomicUsize::new(0));
        let started_clone = started.clone();

        let executor = Executor::builder()
            .name("ui")
            .on_start(move || {
                started_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(())
            })
            .spawn()
            .unwrap();

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(executor.thread_name(), Some("ui"));
        assert_eq!(executor.call(|| thread::current().name().map(String::from)).unwrap(), Some("ui".to_string()));
    }

    #[test]
    fn test_begin_invoke_after_dispose_completes_immediately() {
        let executor = Executor::new().unwrap();
        executor.dispose();

        let start = Instant::now();
        let handle = executor.begin_invoke(|| Ok::<_, String>(()));
        assert!(handle.is_completed());
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            executor.end_invoke(&handle),
            Err(InvokeError::Executor(Error::Dispatch(_)))
        ));
    }

    #[test]
    fn test_wait_stopped_from_loop_thread_is_rejected() {
        let executor = Arc::new(Executor::new().unwrap());
        let inner = executor.clone();
        let result = executor.call(move || inner.wait_stopped()).unwrap();
        assert!(result.is_err());
        executor.dispose();
        executor.wait_stopped().unwrap();
        assert!(!executor.is_running());
    }
}
