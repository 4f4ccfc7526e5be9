//! Supervised, optionally pinned worker threads.
//!
//! Each pipeline role (receiver, handler, sender) implements [`Worker`] and is
//! started through [`spawn_worker`]. The supervisor pins the thread, runs the
//! worker loop, and if the loop panics logs the failure and re-enters it. A
//! dead handler would otherwise leave its lane's buffers stranded and stall
//! the receiver's escalation forever.

use crate::affinity::AffinitySetter;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

pub trait Worker: Send + 'static {
    /// Thread name, also used as the `worker` field in log events.
    fn name(&self) -> String;

    /// Runs the worker loop. Returns when `stop` is raised or the worker has
    /// finished its own budget.
    fn run(&mut self, stop: &AtomicBool);
}

pub fn spawn_worker<W: Worker>(
    mut worker: W,
    cpu: usize,
    affinity: Arc<dyn AffinitySetter>,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    let name = worker.name();
    std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            match affinity.pin_current_thread(cpu) {
                Ok(()) => info!(worker = %name, cpu, "worker started"),
                Err(e) => warn!(worker = %name, cpu, error = %e, "failed to pin worker, running unpinned"),
            }

            loop {
                match catch_unwind(AssertUnwindSafe(|| worker.run(&stop))) {
                    Ok(()) => break,
                    Err(panic) => {
                        let msg = panic_message(&panic);
                        error!(worker = %name, panic = %msg, "worker loop panicked");
                        if stop.load(Ordering::Acquire) {
                            break;
                        }
                    }
                }
            }

            info!(worker = %name, "worker stopped");
        })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::NoAffinity;

    struct FlakyWorker {
        runs: Arc<std::sync::atomic::AtomicU32>,
    }

    impl Worker for FlakyWorker {
        fn name(&self) -> String {
            "flaky".into()
        }

        fn run(&mut self, _stop: &AtomicBool) {
            let n = self.runs.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                panic!("boom #{n}");
            }
        }
    }

    #[test]
    fn panicking_worker_is_restarted_until_it_returns() {
        let runs = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let handle = spawn_worker(
            FlakyWorker {
                runs: Arc::clone(&runs),
            },
            0,
            Arc::new(NoAffinity),
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        handle.join().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
