//! The owned loop thread.
//!
//! # Lifecycle
//!
//! ```text
//! creator                          loop thread
//!    │ spawn ─────────────────────────►│ install ContextGuard
//!    │                                 │ run startup hook
//!    │ ◄──────── init signal ──────────┤ Ok(()) / Err(message)
//!    │ (constructor returns)           │
//!    │                                 │ run_loop: Call / Post / Quit / Wake
//!    │                                 │   ... until Quit, abort, or panic
//!    │                                 │ close + drop queue (abandons calls)
//!    │                                 │ on_thread_error (loop failure only)
//!    │                                 │ on_thread_stopped
//! ```

mod observer;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, Thread};

pub use observer::LoopObserver;

pub(crate) use observer::{Observers, error_observer, stopped_observer};

use crate::config::LoopConfig;
use crate::dispatch::{ContextGuard, LoopId, Message};
use crate::error::{Error, Result, panic_message};
use crate::sync::ResetEvent;

/// Boxed error returned by a startup hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Setup code run on the loop thread before the constructor returns.
pub type StartupHook = Box<dyn FnOnce() -> std::result::Result<(), BoxError> + Send + 'static>;

type InitSignal = (
    Sender<std::result::Result<(), String>>,
    Receiver<std::result::Result<(), String>>,
);

/// State shared between the loop thread and everything that posts to it.
pub(crate) struct LoopShared {
    id: LoopId,
    /// No further messages are accepted.
    closed: AtomicBool,
    /// Queued messages must be dropped instead of run.
    aborted: AtomicBool,
    running: AtomicBool,
    next_call: AtomicU64,
    stopped: ResetEvent,
    pub(crate) observers: Observers,
}

impl LoopShared {
    pub(crate) fn new(observers: Vec<Arc<dyn LoopObserver>>) -> Self {
        let registry = Observers::default();
        for observer in observers {
            registry.add(observer);
        }
        Self {
            id: LoopId::next(),
            closed: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            running: AtomicBool::new(false),
            next_call: AtomicU64::new(1),
            stopped: ResetEvent::new(false),
            observers: registry,
        }
    }

    pub(crate) fn id(&self) -> LoopId {
        self.id
    }

    pub(crate) fn next_call_id(&self) -> u64 {
        self.next_call.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns `true` if this call closed the loop.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns `true` if this call requested the abort.
    pub(crate) fn abort(&self) -> bool {
        !self.aborted.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn stopped(&self) -> &ResetEvent {
        &self.stopped
    }
}

/// Spawn the loop thread and block until it reports startup.
///
/// Returns a handle to the spawned thread. The thread is detached; its exit is
/// observable through [`LoopShared::stopped`].
pub(crate) fn spawn(
    config: &LoopConfig,
    shared: Arc<LoopShared>,
    rx: Receiver<Message>,
    on_start: Option<StartupHook>,
) -> Result<Thread> {
    config.validate()?;

    let (init_tx, init_rx): InitSignal = mpsc::channel();

    let mut builder = thread::Builder::new().name(config.thread_name.clone());
    if let Some(size) = config.stack_size {
        builder = builder.stack_size(size);
    }

    let loop_shared = shared.clone();
    let handle = builder.spawn(move || thread_main(loop_shared, rx, on_start, init_tx))?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok(handle.thread().clone()),
        Ok(Err(message)) => {
            let _ = handle.join();
            Err(Error::Startup(message))
        }
        Err(_) => {
            // The thread died without reporting either way.
            let reason = match handle.join() {
                Err(payload) => format!("loop thread panicked: {}", panic_message(payload.as_ref())),
                Ok(()) => "loop thread exited before signalling startup".to_string(),
            };
            tracing::error!("{} failed to start: {}", shared.id(), reason);
            Err(Error::Startup(reason))
        }
    }
}

fn run_startup_hook(hook: StartupHook) -> std::result::Result<(), String> {
    match catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("startup hook panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn thread_main(
    shared: Arc<LoopShared>,
    rx: Receiver<Message>,
    on_start: Option<StartupHook>,
    init_tx: Sender<std::result::Result<(), String>>,
) {
    let id = shared.id();
    let _context = ContextGuard::install(id);

    if let Some(hook) = on_start
        && let Err(message) = run_startup_hook(hook)
    {
        shared.close();
        let _ = init_tx.send(Err(message));
        return;
    }

    shared.running.store(true, Ordering::Release);
    let _ = init_tx.send(Ok(()));
    drop(init_tx);

    tracing::debug!(
        "{} started on thread {:?}",
        id,
        thread::current().name().unwrap_or("<unnamed>")
    );

    let outcome = catch_unwind(AssertUnwindSafe(|| run_loop(&shared, rx)));

    shared.close();
    shared.running.store(false, Ordering::Release);

    if let Err(payload) = outcome {
        let error = Error::Loop(panic_message(payload.as_ref()));
        tracing::warn!("{} terminated: {}", id, error);
        shared.observers.notify_error(id, &error);
    }

    tracing::debug!("{} stopped", id);
    shared.observers.notify_stopped(id);
    shared.stopped.set();
}

fn run_loop(shared: &LoopShared, rx: Receiver<Message>) {
    for message in rx.iter() {
        if shared.is_aborted() {
            tracing::trace!("{} aborted, dropping queued work", shared.id());
            break;
        }

        match message {
            Message::Call(call) => {
                tracing::trace!("{} running call {}", shared.id(), call.id());
                call.run();
            }
            Message::Post(job) => job(),
            Message::Quit => break,
            Message::Wake => {}
        }
    }

    // Close before the queue is dropped so late posters get a dispatch error.
    shared.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use std::time::Duration;

    fn start(on_start: Option<StartupHook>) -> Result<(Dispatcher, Thread)> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(LoopShared::new(Vec::new()));
        let thread = spawn(&LoopConfig::default(), shared.clone(), rx, on_start)?;
        Ok((Dispatcher::new(tx, shared), thread))
    }

    #[test]
    fn test_spawn_reports_ready() {
        let (dispatcher, thread) = start(None).unwrap();
        assert!(dispatcher.shared().is_running());
        assert_eq!(thread.name(), Some("msgloop"));

        let ran_on = dispatcher.send(|| Ok::<_, String>(thread::current().id())).unwrap();
        assert_eq!(ran_on, thread.id());

        dispatcher.abort();
        assert!(dispatcher.shared().stopped().wait_timeout(Duration::from_secs(5)));
        assert!(!dispatcher.shared().is_running());
    }

    #[test]
    fn test_startup_hook_error() {
        let hook: StartupHook =
            Box::new(|| -> std::result::Result<(), BoxError> { Err("no display".into()) });
        let err = start(Some(hook)).err().unwrap();
        assert_eq!(err, Error::Startup("no display".to_string()));
    }

    #[test]
    fn test_startup_hook_panic() {
        let hook: StartupHook =
            Box::new(|| -> std::result::Result<(), BoxError> { panic!("setup exploded") });
        let err = start(Some(hook)).err().unwrap();
        assert!(matches!(err, Error::Startup(ref msg) if msg.contains("setup exploded")));
    }

    #[test]
    fn test_invalid_config_fails_before_spawn() {
        let (_tx, rx) = mpsc::channel();
        let shared = Arc::new(LoopShared::new(Vec::new()));
        let config = LoopConfig::default().with_stack_size(0);
        let err = spawn(&config, shared, rx, None).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_quit_drains_queue() {
        let (dispatcher, _thread) = start(None).unwrap();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            dispatcher
                .post(Box::new(move || log.lock().unwrap().push(i)))
                .unwrap();
        }
        dispatcher.quit();
        assert!(dispatcher.shared().stopped().wait_timeout(Duration::from_secs(5)));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }
}
