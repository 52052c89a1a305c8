//! Callback dispatch pool.
//!
//! A fixed set of workers consumes bounded queues of callback jobs. Jobs
//! for the same key always hash to the same worker, so notifications for
//! one key are delivered in submission order; across keys nothing is
//! promised. A panicking callback is caught and logged, leaving other
//! callbacks and later invocations untouched.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;

use crate::constants::DISPATCH_QUEUE_DEPTH;
use crate::key::ConfigKey;
use crate::watch::CallbackFn;
use crate::watch::ConfigChange;

struct Job {
    callback: CallbackFn,
    change: ConfigChange,
    key: ConfigKey,
}

/// Submission side of the pool. Cheap to clone behind an `Arc`.
pub(crate) struct Dispatcher {
    senders: Vec<mpsc::Sender<Job>>,
}

/// Join side of the pool, held by the client for shutdown.
pub(crate) struct DispatcherWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns `workers` dispatch tasks.
    pub(crate) fn spawn(workers: usize) -> (Dispatcher, DispatcherWorkers) {
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for slot in 0..workers {
            let (tx, rx) = mpsc::channel::<Job>(DISPATCH_QUEUE_DEPTH);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(slot, rx)));
        }
        (Dispatcher { senders }, DispatcherWorkers { handles })
    }

    /// Enqueues one callback invocation.
    ///
    /// Applies backpressure to the poller when the target worker's queue
    /// is full. Submission order per key is preserved because the worker
    /// slot is a pure function of the key.
    pub(crate) async fn submit(
        &self,
        key: &ConfigKey,
        callback: CallbackFn,
        change: ConfigChange,
    ) {
        let slot = self.slot_for(key);
        let job = Job {
            callback,
            change,
            key: key.clone(),
        };
        if self.senders[slot].send(job).await.is_err() {
            debug!("dispatch worker {} is gone, dropping notification", slot);
        }
    }

    fn slot_for(
        &self,
        key: &ConfigKey,
    ) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.senders.len()
    }
}

impl DispatcherWorkers {
    /// Waits for the workers to drain and exit. The caller must have
    /// dropped every `Dispatcher` clone first, otherwise the queues stay
    /// open and this never returns.
    pub(crate) async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    slot: usize,
    mut rx: mpsc::Receiver<Job>,
) {
    debug!("dispatch worker {} started", slot);
    while let Some(job) = rx.recv().await {
        let outcome = catch_unwind(AssertUnwindSafe(|| (job.callback)(job.change)));
        if outcome.is_err() {
            error!("callback for {} panicked, continuing", job.key);
        }
    }
    debug!("dispatch worker {} stopped", slot);
}
