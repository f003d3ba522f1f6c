//! Resizable pool of worker tasks.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Job;

/// Worker pool whose only job is to keep exactly the desired number of
/// concurrent execution flows alive.
///
/// Admission is a rendezvous: an idle worker advertises a job slot and a
/// submitter completes the handoff by filling it, so a handoff only ever
/// succeeds against a worker that is actually free. Every worker owns a
/// private stop token derived from the pool-wide one; resizing either
/// spawns the missing workers or cancels the surplus prefix of existing
/// ones. A worker that is mid-job when cancelled finishes that job before
/// exiting.
///
/// Cloning the pool clones a handle to the same workers.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    ready_tx: mpsc::Sender<oneshot::Sender<Job>>,
    ready_rx: tokio::sync::Mutex<mpsc::Receiver<oneshot::Sender<Job>>>,
    stoppers: Mutex<Vec<CancellationToken>>,
    stop: CancellationToken,
}

impl WorkerPool {
    /// Create an empty pool. Workers appear on the first
    /// [`set_worker_quantity`](Self::set_worker_quantity) call.
    pub fn new(stop: CancellationToken) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(PoolInner {
                ready_tx,
                ready_rx: tokio::sync::Mutex::new(ready_rx),
                stoppers: Mutex::new(Vec::new()),
                stop,
            }),
        }
    }

    /// Hand a job to a free worker, waiting until one is available.
    /// Contending submitters are served in arrival order. Only errors
    /// when the pool itself has gone away.
    pub async fn handoff(&self, mut job: Job) -> Result<(), ()> {
        loop {
            let slot = self.inner.ready_rx.lock().await.recv().await;
            match slot {
                // A slot may belong to a worker cancelled after
                // advertising it; reclaim the job and take the next slot.
                Some(worker) => match worker.send(job) {
                    Ok(()) => return Ok(()),
                    Err(reclaimed) => job = reclaimed,
                },
                None => return Err(()),
            }
        }
    }

    /// Number of live workers.
    pub fn worker_count(&self) -> usize {
        self.lock_stoppers().len()
    }

    /// Adjust the set of live workers to exactly `quantity`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn set_worker_quantity(&self, quantity: usize) {
        let mut stoppers = self.lock_stoppers();

        if stoppers.len() == quantity {
            return;
        }

        debug!(from = stoppers.len(), to = quantity, "resizing worker pool");

        if stoppers.len() < quantity {
            let missing = quantity - stoppers.len();
            for _ in 0..missing {
                stoppers.push(self.spawn_worker());
            }
            return;
        }

        // Cancel the surplus prefix; those workers finish their current
        // job and exit.
        let surplus = stoppers.len() - quantity;
        for stopper in stoppers.drain(..surplus) {
            stopper.cancel();
        }
    }

    fn spawn_worker(&self) -> CancellationToken {
        let stopper = self.inner.stop.child_token();
        let token = stopper.clone();
        let ready_tx = self.inner.ready_tx.clone();

        tokio::spawn(async move {
            loop {
                let (slot_tx, slot_rx) = oneshot::channel::<Job>();

                // Advertise a free slot, then wait for a submitter to
                // fill it. A cancelled worker must not advertise again.
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    sent = ready_tx.send(slot_tx) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }

                // Prefer a job that already claimed the slot over the
                // stop signal so accepted work is not dropped.
                let job = tokio::select! {
                    biased;
                    job = slot_rx => job,
                    _ = token.cancelled() => break,
                };
                match job {
                    Ok(job) => job().await,
                    // The submitter that claimed the slot went away
                    // before filling it; advertise again.
                    Err(_) => continue,
                }
            }
        });

        stopper
    }

    fn lock_stoppers(&self) -> std::sync::MutexGuard<'_, Vec<CancellationToken>> {
        self.inner.stoppers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::super::JobFuture;
    use super::*;

    fn counting_job(counter: Arc<AtomicU32>) -> Job {
        Box::new(move || -> JobFuture {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn handoff_with_timeout(pool: &WorkerPool, job: Job, wait: Duration) -> bool {
        tokio::time::timeout(wait, pool.handoff(job)).await.is_ok()
    }

    #[tokio::test]
    async fn test_resize_spawns_exactly_requested_workers() {
        let pool = WorkerPool::new(CancellationToken::new());
        assert_eq!(pool.worker_count(), 0);

        pool.set_worker_quantity(5);
        assert_eq!(pool.worker_count(), 5);

        pool.set_worker_quantity(2);
        assert_eq!(pool.worker_count(), 2);

        pool.set_worker_quantity(7);
        assert_eq!(pool.worker_count(), 7);
    }

    #[tokio::test]
    async fn test_workers_execute_jobs() {
        let pool = WorkerPool::new(CancellationToken::new());
        pool.set_worker_quantity(3);

        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..10 {
            pool.handoff(counting_job(Arc::clone(&counter))).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_no_workers_means_no_handoff() {
        let pool = WorkerPool::new(CancellationToken::new());
        let counter = Arc::new(AtomicU32::new(0));

        let handed = handoff_with_timeout(
            &pool,
            counting_job(Arc::clone(&counter)),
            Duration::from_millis(30),
        )
        .await;

        assert!(!handed);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inflight_job_finishes_after_shrink() {
        let pool = WorkerPool::new(CancellationToken::new());
        pool.set_worker_quantity(1);

        let counter = Arc::new(AtomicU32::new(0));
        let slow_counter = Arc::clone(&counter);
        let slow: Job = Box::new(move || -> JobFuture {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                slow_counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        pool.handoff(slow).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.set_worker_quantity(0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pool_stop_cancels_all_workers() {
        let stop = CancellationToken::new();
        let pool = WorkerPool::new(stop.clone());
        pool.set_worker_quantity(4);

        stop.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let counter = Arc::new(AtomicU32::new(0));
        let handed = handoff_with_timeout(
            &pool,
            counting_job(Arc::clone(&counter)),
            Duration::from_millis(30),
        )
        .await;

        assert!(!handed);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
