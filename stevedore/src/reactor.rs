use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Outcome of a single callback invocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// The callback ran to completion; the reactor keeps going.
    Completed,
    /// The callback observed shutdown; the reactor worker exits.
    Interrupted,
}

/// The single-method callback capability driven by a [`Reactor`].
///
/// The reactor invokes `tick` with exclusive access, so implementations are
/// free to hold mutable state without locking. The handle passed in lets a
/// tick request a follow-up run of itself.
#[async_trait]
pub trait Tick: Send {
    async fn tick(&mut self, handle: &ReactorHandle) -> TickOutcome;
}

/// Handle for requesting reactor runs. Cheap to clone;
/// [`update`](ReactorHandle::update) is thread-safe and never blocks.
#[derive(Clone, Debug)]
pub struct ReactorHandle {
    shared: Arc<Shared>,
}

impl ReactorHandle {
    /// Request that the callback run at least once more after this call.
    /// Calls arriving while a run is in flight coalesce into exactly one
    /// additional run.
    pub fn update(&self) {
        self.shared.pending.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
    }
}

#[derive(Debug)]
struct Shared {
    pending: AtomicBool,
    cancelled: AtomicBool,
    wakeup: Notify,
}

/// Single-worker, level-triggered task runner with a timed refresh.
///
/// The worker serializes every callback invocation: at most one runs at any
/// time. [`ReactorHandle::update`] raises a level that guarantees at least
/// one further run; the callback additionally runs every `interval` even
/// without updates. Updates pending when [`stop`](Reactor::stop) is called
/// are discarded.
pub struct Reactor<C> {
    name: String,
    shared: Arc<Shared>,
    worker: JoinHandle<C>,
}

impl<C> Reactor<C>
where
    C: Tick + 'static,
{
    /// Spawn the worker. The callback does not run until the first update
    /// or until `interval` elapses.
    pub fn spawn(name: impl Into<String>, callback: C, interval: Duration) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            pending: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            wakeup: Notify::new(),
        });
        let worker = tokio::spawn(worker_loop(
            name.clone(),
            Arc::clone(&shared),
            callback,
            interval,
        ));
        Self {
            name,
            shared,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle for requesting runs from other tasks.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Request that the callback run at least once more.
    pub fn update(&self) {
        self.handle().update();
    }

    /// Signal shutdown and wait for the worker to finish any in-flight
    /// callback invocation and terminate. Returns the callback so the owner
    /// can reclaim state it holds.
    pub async fn stop(self) -> C {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.wakeup.notify_one();
        match self.worker.await {
            Ok(callback) => callback,
            Err(err) if err.is_panic() => {
                std::panic::resume_unwind(err.into_panic())
            }
            Err(_) => unreachable!("reactor worker is never aborted"),
        }
    }
}

async fn worker_loop<C: Tick>(
    name: String,
    shared: Arc<Shared>,
    mut callback: C,
    interval: Duration,
) -> C {
    tracing::debug!(reactor = %name, "worker started");
    loop {
        tokio::select! {
            _ = shared.wakeup.notified() => {}
            _ = tokio::time::sleep(interval) => {}
        }

        // Run while the level stays raised; updates that arrive mid-run
        // collapse into one follow-up run.
        loop {
            if shared.cancelled.load(Ordering::SeqCst) {
                tracing::debug!(reactor = %name, "worker terminated");
                return callback;
            }
            shared.pending.store(false, Ordering::SeqCst);
            match callback
                .tick(&ReactorHandle {
                    shared: Arc::clone(&shared),
                })
                .await
            {
                TickOutcome::Completed => {}
                TickOutcome::Interrupted => {
                    tracing::debug!(reactor = %name, "worker interrupted");
                    return callback;
                }
            }
            if !shared.pending.load(Ordering::SeqCst) {
                break;
            }
        }
    }
}
