//! Integration tests for startup, disposal and lifecycle notifications.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use msgloop_core::{BoxError, Error, Executor, InvokeError, LoopConfig, LoopId, LoopObserver};

/// Records every notification in arrival order.
#[derive(Default)]
struct Journal(Mutex<Vec<String>>);

impl Journal {
    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl LoopObserver for Journal {
    fn on_thread_error(&self, _loop_id: LoopId, error: &Error) {
        self.0.lock().unwrap().push(format!("error: {}", error));
    }

    fn on_thread_stopped(&self, _loop_id: LoopId) {
        self.0.lock().unwrap().push("stopped".to_string());
    }
}

/// A failing startup hook fails construction.
#[test]
fn test_startup_failure_is_returned_from_constructor() {
    let err = Executor::builder()
        .on_start(|| Err::<(), BoxError>("display unavailable".into()))
        .spawn()
        .unwrap_err();

    assert_eq!(err, Error::Startup("display unavailable".to_string()));
}

/// A panic during startup also fails construction instead of hanging it.
#[test]
fn test_startup_panic_is_returned_from_constructor() {
    let err = Executor::builder()
        .on_start(|| -> Result<(), BoxError> { panic!("apartment init failed") })
        .spawn()
        .unwrap_err();

    assert!(matches!(err, Error::Startup(ref msg) if msg.contains("apartment init failed")));
}

/// Startup failures do not raise loop notifications.
#[test]
fn test_startup_failure_raises_no_notifications() {
    let journal = Arc::new(Journal::default());

    let result = Executor::builder()
        .observer(journal.clone())
        .on_start(|| Err::<(), BoxError>("nope".into()))
        .spawn();

    assert!(result.is_err());
    assert!(journal.entries().is_empty());
}

/// Invalid configuration is rejected before a thread is spawned.
#[test]
fn test_invalid_config_is_rejected() {
    let err = Executor::with_config(LoopConfig::default().with_thread_name("")).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

/// After disposal new calls fail with a dispatch error instead of hanging.
#[test]
fn test_invoke_after_dispose_fails_fast() {
    let executor = Executor::new().unwrap();
    executor.dispose();

    let err = executor.invoke(|| Ok::<_, String>(1)).unwrap_err();
    assert!(matches!(err, InvokeError::Executor(Error::Dispatch(_))));

    let handle = executor.begin_invoke(|| Ok::<_, String>(1));
    assert!(matches!(
        executor.end_invoke(&handle),
        Err(InvokeError::Executor(Error::Dispatch(_)))
    ));

    assert!(matches!(executor.post(|| ()), Err(Error::Dispatch(_))));
}

/// The call running at disposal finishes, but cannot start new inline work.
#[test]
fn test_inline_invoke_after_dispose_fails() {
    let executor = Arc::new(Executor::new().unwrap());
    let inner = executor.clone();

    let (invoked, called) = executor
        .call(move || {
            inner.dispose();
            (inner.invoke(|| Ok::<_, String>(1)), inner.call(|| 2))
        })
        .unwrap();

    assert!(matches!(invoked, Err(InvokeError::Executor(Error::Dispatch(_)))));
    assert!(matches!(called, Err(Error::Dispatch(_))));
    executor.wait_stopped().unwrap();
}

/// Disposal abandons queued calls; their callers are released with an error.
#[test]
fn test_dispose_abandons_queued_calls() {
    let executor = Arc::new(Executor::new().unwrap());

    // Occupy the loop so the next call stays queued.
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let busy_gate = gate.clone();
    let finished = Arc::new(AtomicUsize::new(0));
    let busy_finished = finished.clone();
    executor
        .post(move || {
            let _open = busy_gate.lock().unwrap();
            busy_finished.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

    let queued = executor.begin_invoke(|| Ok::<_, String>("never runs"));
    // Give the relay time to enqueue behind the blocked post.
    thread::sleep(Duration::from_millis(200));

    executor.dispose();
    drop(held);

    // The running work finishes; the queued call is dropped.
    assert!(matches!(
        executor.end_invoke(&queued),
        Err(InvokeError::Executor(Error::Abandoned))
    ));
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    executor.wait_stopped().unwrap();
    assert!(!executor.is_running());
}

/// Graceful shutdown drains queued work before the loop exits.
#[test]
fn test_shutdown_drains_queue() {
    let executor = Executor::new().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let seen = seen.clone();
        executor
            .post(move || {
                thread::sleep(Duration::from_millis(2));
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    executor.shutdown();

    assert!(executor.wait_stopped_timeout(Duration::from_secs(5)));
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert!(matches!(
        executor.invoke(|| Ok::<_, String>(())),
        Err(InvokeError::Executor(Error::Dispatch(_)))
    ));
}

/// Disposal raises only the stopped notification, exactly once.
#[test]
fn test_dispose_raises_stopped_once() {
    let journal = Arc::new(Journal::default());
    let executor = Executor::builder().observer(journal.clone()).spawn().unwrap();

    executor.dispose();
    executor.dispose();
    executor.wait_stopped().unwrap();

    assert_eq!(journal.entries(), vec!["stopped".to_string()]);
}

/// A panic escaping a posted closure is a loop failure: error, then stopped.
#[test]
fn test_loop_failure_raises_error_then_stopped() {
    let journal = Arc::new(Journal::default());
    let executor = Executor::builder().observer(journal.clone()).spawn().unwrap();

    executor.post(|| panic!("unhandled in loop")).unwrap();
    assert!(executor.wait_stopped_timeout(Duration::from_secs(5)));

    assert_eq!(
        journal.entries(),
        vec![
            "error: loop failed: unhandled in loop".to_string(),
            "stopped".to_string()
        ]
    );
    assert!(!executor.is_running());
    assert!(matches!(executor.call(|| ()), Err(Error::Dispatch(_))));
}

/// Closure observers registered after construction are fired too.
#[test]
fn test_closure_observers() {
    let executor = Executor::new().unwrap();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let stops = Arc::new(AtomicUsize::new(0));

    let errors_clone = errors.clone();
    executor.on_thread_error(move |e| errors_clone.lock().unwrap().push(e.clone()));
    let stops_clone = stops.clone();
    executor.on_thread_stopped(move || {
        stops_clone.fetch_add(1, Ordering::SeqCst);
    });

    executor.post(|| panic!("late failure")).unwrap();
    assert!(executor.wait_stopped_timeout(Duration::from_secs(5)));

    assert_eq!(
        *errors.lock().unwrap(),
        vec![Error::Loop("late failure".to_string())]
    );
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

/// Dropping the executor stops its loop.
#[test]
fn test_drop_disposes() {
    let stops = Arc::new(AtomicUsize::new(0));
    let stops_clone = stops.clone();

    let executor = Executor::builder()
        .on_thread_stopped(move || {
            stops_clone.fetch_add(1, Ordering::SeqCst);
        })
        .spawn()
        .unwrap();
    assert_eq!(executor.call(|| 5).unwrap(), 5);
    drop(executor);

    for _ in 0..100 {
        if stops.load(Ordering::SeqCst) == 1 {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

/// The loop installs its id as the thread-local scheduling context.
#[test]
fn test_loop_thread_context() {
    let executor = Executor::new().unwrap();
    assert!(!msgloop_core::is_loop_thread());

    let seen = executor.call(msgloop_core::current_loop_id).unwrap();
    assert_eq!(seen, Some(executor.loop_id()));
}

/// Configuration from a JSON file names the loop thread.
#[test]
fn test_config_file_names_thread() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("loop.json");
    std::fs::write(&path, r#"{ "thread_name": "render", "stack_size": 1048576 }"#).unwrap();

    let config = LoopConfig::from_json_file(&path).unwrap();
    assert_eq!(config.stack_size, Some(1024 * 1024));

    let executor = Executor::with_config(config).unwrap();
    assert_eq!(executor.thread_name(), Some("render"));
    assert_eq!(
        executor.call(|| thread::current().name().map(str::to_string)).unwrap(),
        Some("render".to_string())
    );
}
