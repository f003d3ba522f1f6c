//! Dynamic job queue with hot-swappable priority policies.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

use super::{Job, JobFuture};

/// How to insert a job into the queue.
pub(crate) type EnqueuePolicy = Box<dyn Fn(&mut Vec<Job>, Job) + Send + Sync>;

/// How to remove the next job from the queue.
pub(crate) type DequeuePolicy = Box<dyn Fn(&mut Vec<Job>) -> Option<Job> + Send + Sync>;

/// Enqueue at the end of the queue.
pub(crate) fn enqueue_at_end_policy() -> EnqueuePolicy {
    Box::new(|jobs, job| jobs.push(job))
}

/// Dequeue the first job in the queue (FIFO priority).
pub(crate) fn fifo_dequeue_policy() -> DequeuePolicy {
    Box::new(|jobs| {
        if jobs.is_empty() {
            None
        } else {
            Some(jobs.remove(0))
        }
    })
}

/// Dequeue the latest queued job (LIFO priority).
pub(crate) fn lifo_dequeue_policy() -> DequeuePolicy {
    Box::new(|jobs| jobs.pop())
}

struct Policies {
    enqueue: EnqueuePolicy,
    dequeue: DequeuePolicy,
}

#[derive(Debug, Clone, Copy)]
struct QueueStats {
    size: usize,
    last_empty: Instant,
}

struct QueueShared {
    jobs: Mutex<Vec<Job>>,
    /// Policies live under their own read-write lock so they can be
    /// hot-swapped per call without blocking in-progress queue
    /// operations.
    policies: RwLock<Policies>,
    stats: Mutex<QueueStats>,
    /// One-permit wake signal: "the queue has items, look again". A
    /// pending permit is enough, the dequeuer re-checks emptiness after
    /// waking anyway.
    wake: Notify,
}

impl QueueShared {
    fn enqueue(&self, job: Job) {
        {
            let mut stats = self.lock_stats();
            if stats.size == 0 {
                stats.last_empty = Instant::now();
            }
            stats.size += 1;
        }

        let mut jobs = self.lock_jobs();
        match self.policies.read() {
            Ok(policies) => (policies.enqueue)(&mut jobs, job),
            Err(poisoned) => (poisoned.into_inner().enqueue)(&mut jobs, job),
        }
        self.wake.notify_one();
    }

    fn dequeue(&self) -> Option<Job> {
        let job = {
            let mut jobs = self.lock_jobs();
            match self.policies.read() {
                Ok(policies) => (policies.dequeue)(&mut jobs),
                Err(poisoned) => (poisoned.into_inner().dequeue)(&mut jobs),
            }
        };

        if job.is_some() {
            let mut stats = self.lock_stats();
            stats.size = stats.size.saturating_sub(1);
            if stats.size == 0 {
                stats.last_empty = Instant::now();
            }
        }
        job
    }

    fn is_empty(&self) -> bool {
        self.lock_jobs().is_empty()
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, QueueStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A queue of pending jobs whose enqueue and dequeue priorities can be
/// changed while it is running.
///
/// Two background tasks move jobs through: the enqueuer reads submissions
/// from the in-channel and applies the enqueue policy; the dequeuer
/// applies the dequeue policy and pushes jobs to the out-channel, sleeping
/// on the wake signal whenever the queue is empty. The wake permit may
/// belong to an item that was already processed, so the dequeuer must
/// re-check emptiness after waking.
pub(crate) struct DynamicQueue {
    in_tx: mpsc::Sender<Job>,
    shared: Arc<QueueShared>,
}

impl DynamicQueue {
    /// Create the queue and spawn its enqueuer/dequeuer tasks. Returns
    /// the queue handle and the out-channel receiver.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(
        stop: CancellationToken,
        enqueue: EnqueuePolicy,
        dequeue: DequeuePolicy,
    ) -> (Self, mpsc::Receiver<Job>) {
        let (in_tx, mut in_rx) = mpsc::channel::<Job>(1);
        let (out_tx, out_rx) = mpsc::channel::<Job>(1);

        let shared = Arc::new(QueueShared {
            jobs: Mutex::new(Vec::new()),
            policies: RwLock::new(Policies { enqueue, dequeue }),
            stats: Mutex::new(QueueStats { size: 0, last_empty: Instant::now() }),
            wake: Notify::new(),
        });

        // Enqueuer.
        let enqueuer_shared = Arc::clone(&shared);
        let enqueuer_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                let job = tokio::select! {
                    _ = enqueuer_stop.cancelled() => break,
                    job = in_rx.recv() => job,
                };
                match job {
                    Some(job) => enqueuer_shared.enqueue(job),
                    None => break,
                }
            }
        });

        // Dequeuer.
        let dequeuer_shared = Arc::clone(&shared);
        let dequeuer_stop = stop;
        tokio::spawn(async move {
            loop {
                if dequeuer_stop.is_cancelled() {
                    break;
                }

                if dequeuer_shared.is_empty() {
                    tokio::select! {
                        _ = dequeuer_stop.cancelled() => break,
                        _ = dequeuer_shared.wake.notified() => {}
                    }
                    // The permit may be from an already-processed item;
                    // this re-check is mandatory.
                    if dequeuer_shared.is_empty() {
                        continue;
                    }
                }

                if let Some(job) = dequeuer_shared.dequeue() {
                    tokio::select! {
                        _ = dequeuer_stop.cancelled() => break,
                        sent = out_tx.send(job) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        });

        (Self { in_tx, shared }, out_rx)
    }

    /// A sender submitting jobs into the queue.
    pub fn sender(&self) -> mpsc::Sender<Job> {
        self.in_tx.clone()
    }

    /// Swap the enqueue policy for subsequent enqueues.
    #[allow(dead_code)]
    pub fn set_enqueue_policy(&self, policy: EnqueuePolicy) {
        match self.shared.policies.write() {
            Ok(mut policies) => policies.enqueue = policy,
            Err(poisoned) => poisoned.into_inner().enqueue = policy,
        }
    }

    /// Swap the dequeue policy for subsequent dequeues.
    pub fn set_dequeue_policy(&self, policy: DequeuePolicy) {
        match self.shared.policies.write() {
            Ok(mut policies) => policies.dequeue = policy,
            Err(poisoned) => poisoned.into_inner().dequeue = policy,
        }
    }

    /// Jobs currently queued.
    pub fn size(&self) -> usize {
        self.shared.lock_stats().size
    }

    /// How long the queue has gone without being empty. Zero while the
    /// queue is empty.
    pub fn since_last_empty(&self) -> Duration {
        let mut stats = self.shared.lock_stats();
        if stats.size == 0 {
            stats.last_empty = Instant::now();
        }
        stats.last_empty.elapsed()
    }
}
