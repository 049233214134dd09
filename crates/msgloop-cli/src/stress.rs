//! Concurrency check: many threads calling into one loop.

use std::cell::RefCell;
use std::thread;

use msgloop_core::{Executor, LoopConfig};

use crate::colors;

thread_local! {
    /// Entries appended by marshaled calls. Only the loop thread ever touches its copy.
    static LOG: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Run `threads` callers making `calls` calls each, then verify the loop-side log.
pub fn execute(config: LoopConfig, threads: usize, calls: usize) -> anyhow::Result<()> {
    let executor = Executor::with_config(config)?;
    tracing::debug!("Stressing {} with {} threads x {} calls", executor.loop_id(), threads, calls);

    thread::scope(|scope| -> anyhow::Result<()> {
        let callers: Vec<_> = (0..threads)
            .map(|caller| {
                let executor = &executor;
                thread::Builder::new()
                    .name(format!("caller-{}", caller))
                    .spawn_scoped(scope, move || -> msgloop_core::Result<()> {
                        for seq in 0..calls {
                            executor.call(move || LOG.with(|log| log.borrow_mut().push((caller, seq))))?;
                        }
                        Ok(())
                    })
            })
            .collect::<Result<_, _>>()?;

        for caller in callers {
            caller
                .join()
                .map_err(|_| anyhow::anyhow!("caller thread panicked"))??;
        }
        Ok(())
    })?;

    let log = executor.call(|| LOG.with(|log| log.take()))?;
    executor.shutdown();

    println!("{} entries from {} threads", log.len(), threads);
    verify(&log, threads, calls)?;
    println!("{}{}ok{}", colors::BOLD, colors::GREEN, colors::RESET);
    Ok(())
}

/// Every call ran exactly once, and each caller's calls ran in the order it made them.
fn verify(log: &[(usize, usize)], threads: usize, calls: usize) -> anyhow::Result<()> {
    if log.len() != threads * calls {
        anyhow::bail!(
            "{}expected {} entries, found {}{}",
            colors::RED,
            threads * calls,
            log.len(),
            colors::RESET
        );
    }

    let mut next = vec![0usize; threads];
    for &(caller, seq) in log {
        let Some(expected) = next.get_mut(caller) else {
            anyhow::bail!("entry from unknown caller {}", caller);
        };
        if seq != *expected {
            anyhow::bail!(
                "{}caller {} ran call {} where {} was expected{}",
                colors::RED,
                caller,
                seq,
                expected,
                colors::RESET
            );
        }
        *expected += 1;
    }

    Ok(())
}
