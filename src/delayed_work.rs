//! Delayed work: a single re-arming timer driving one callback.
//!
//! Each `DelayedWork` owns a dedicated tokio worker task with one deadline
//! slot, so at most one execution is ever pending. Arming is a non-blocking
//! message to the worker and may be issued from inside the callback itself;
//! such commands are handled after the callback returns.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

#[derive(Debug)]
enum Command {
    /// Arm the deadline unless one is already armed.
    Schedule(Duration),
    /// Replace any armed deadline.
    Reschedule(Duration),
    /// Disarm.
    Cancel,
}

/// Handle to a scheduled, cancellable callback.
pub struct DelayedWork {
    name: &'static str,
    commands: mpsc::UnboundedSender<Command>,
    pending: Arc<AtomicBool>,
    worker: JoinHandle<()>,
}

impl DelayedWork {
    /// Spawn the worker task. Must be called from within a tokio runtime.
    pub fn spawn<F>(name: &'static str, callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (commands, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_worker(
            name,
            receiver,
            Arc::clone(&pending),
            callback,
        ));

        Self {
            name,
            commands,
            pending,
            worker,
        }
    }

    /// Run the callback once after `delay`, unless an execution is already
    /// pending (in which case nothing changes).
    pub fn schedule(&self, delay: Duration) {
        self.send(Command::Schedule(delay));
    }

    /// Drop any pending execution and run the callback once after `delay`.
    pub fn reschedule(&self, delay: Duration) {
        self.send(Command::Reschedule(delay));
    }

    /// Disarm any pending execution without waiting. A callback that is
    /// already running is not interrupted.
    pub fn cancel(&self) {
        if self.commands.send(Command::Cancel).is_err() {
            debug!("Delayed work '{}' worker is gone, nothing to cancel", self.name);
        }
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Whether an execution is currently armed.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Cancel any pending execution and wait for the worker to exit.
    ///
    /// When this returns, the callback is neither running nor scheduled,
    /// and never will be again. Must not be awaited from inside the callback.
    pub async fn cancel_sync(self) {
        self.pending.store(false, Ordering::SeqCst);
        self.worker.abort();

        match self.worker.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!("Delayed work '{}' worker failed: {}", self.name, e),
        }
        debug!("Delayed work '{}' cancelled", self.name);
    }

    fn send(&self, command: Command) {
        self.pending.store(true, Ordering::SeqCst);
        if self.commands.send(command).is_err() {
            self.pending.store(false, Ordering::SeqCst);
            warn!("Delayed work '{}' worker is gone, request dropped", self.name);
        }
    }
}

async fn run_worker<F>(
    name: &'static str,
    mut commands: mpsc::UnboundedReceiver<Command>,
    pending: Arc<AtomicBool>,
    mut callback: F,
) where
    F: FnMut() + Send + 'static,
{
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(Command::Schedule(delay)) => {
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + delay);
                        }
                    }
                    Some(Command::Reschedule(delay)) => {
                        deadline = Some(Instant::now() + delay);
                    }
                    Some(Command::Cancel) => {
                        deadline = None;
                    }
                    None => {
                        debug!("Delayed work '{}' handle dropped, worker exiting", name);
                        break;
                    }
                }
                pending.store(deadline.is_some(), Ordering::SeqCst);
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                pending.store(false, Ordering::SeqCst);

                let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback()));
                if result.is_err() {
                    error!("Panic in delayed work '{}' callback, continuing operation", name);
                }
            }
        }
    }
}
