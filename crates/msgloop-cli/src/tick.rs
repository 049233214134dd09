//! Periodic timer that calls back into the loop.
//!
//! Each tick fires on a [`TIMER_THREAD_NAME`] blocking-pool thread, hops onto the loop thread
//! and prints which thread it came from and where it ended up.

use std::convert::Infallible;
use std::io::BufRead;
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::Duration;

use anyhow::Context;
use msgloop_core::{Executor, InvokeError, LoopConfig};
use tokio::sync::oneshot;

use crate::colors;

/// Name of the runtime threads that fire ticks and call into the loop.
pub const TIMER_THREAD_NAME: &str = "msgloop-timer";

/// How long to wait for the loop thread to wind down on exit.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the tick demo until Enter, Ctrl-C or `max_ticks`.
pub async fn execute(
    config: LoopConfig,
    interval_ms: u64,
    max_ticks: Option<u64>,
    async_mode: bool,
) -> anyhow::Result<()> {
    if interval_ms == 0 {
        anyhow::bail!("--interval-ms must be greater than 0");
    }

    let executor = Arc::new(
        Executor::builder()
            .config(config)
            .on_thread_error(|err| tracing::error!("Loop thread failed: {}", err))
            .on_thread_stopped(|| tracing::info!("Loop thread stopped"))
            .spawn()?,
    );

    if max_ticks.is_none() {
        println!(
            "{}Press Enter or Ctrl-C to stop{}",
            colors::DIM,
            colors::RESET
        );
    }

    let mut enter = watch_stdin();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut fired = 0u64;

    let outcome = loop {
        tokio::select! {
            _ = interval.tick() => {
                let executor = executor.clone();
                let result = tokio::task::spawn_blocking(move || announce(&executor, async_mode))
                    .await
                    .context("tick task failed");
                if let Err(e) = result.and_then(|r| r) {
                    break Err(e);
                }
                fired += 1;
                if max_ticks.is_some_and(|max| fired >= max) {
                    break Ok(());
                }
            }
            line = &mut enter, if stdin_open => match line {
                Ok(()) => break Ok(()),
                // EOF or a closed stdin: keep ticking until another stop condition.
                Err(_) => stdin_open = false,
            },
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                }
                break Ok(());
            }
        }
    };

    executor.dispose();
    if !executor.wait_stopped_timeout(STOP_TIMEOUT) {
        tracing::warn!("Loop thread did not stop within {:?}", STOP_TIMEOUT);
    }

    if outcome.is_ok() {
        println!(
            "{}{}✓{} Stopped after {} tick(s)",
            colors::BOLD,
            colors::GREEN,
            colors::RESET,
            fired
        );
    }
    outcome
}

/// Hop onto the loop thread and print the caller and the loop thread.
fn announce(executor: &Executor, async_mode: bool) -> anyhow::Result<()> {
    let caller = thread_label(&thread::current());
    let report = move || println!("From {} in {}", caller, thread_label(&thread::current()));

    if async_mode {
        let handle = executor.begin_invoke(move || {
            report();
            Ok::<_, Infallible>(())
        });
        executor.end_invoke(&handle).map_err(|e| match e {
            InvokeError::Call(never) => match never {},
            InvokeError::Executor(err) => err,
        })?;
    } else {
        executor.call(report)?;
    }

    Ok(())
}

fn thread_label(thread: &Thread) -> String {
    format!("{} ({:?})", thread.name().unwrap_or("unnamed"), thread.id())
}

/// Watch stdin for a line on a plain thread so a blocked read never holds up runtime shutdown.
///
/// The receiver resolves `Ok` on Enter and `Err` once stdin is closed.
fn watch_stdin() -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    let spawned = thread::Builder::new()
        .name("stdin-watch".to_string())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(n) if n > 0 => {
                    let _ = tx.send(());
                }
                _ => drop(tx),
            }
        });

    // Without a watcher the sender is dropped and the receiver reports stdin as closed.
    if let Err(e) = spawned {
        tracing::warn!("Failed to watch stdin: {}", e);
    }

    rx
}
