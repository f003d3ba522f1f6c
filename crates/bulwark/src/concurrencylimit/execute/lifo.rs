//! LIFO executor: queued submissions are served newest-first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;

use super::{
    enqueue_at_end_policy, lifo_dequeue_policy, DynamicQueue, ExecuteJob, Executor, Job,
    JobFuture, WorkerPool,
};

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Configuration for the [`Lifo`] executor.
#[derive(Debug, Clone, Default)]
pub struct LifoConfig {
    /// Maximum time a submission waits to be executed before being
    /// rejected. Zero falls back to one second.
    pub max_wait: Duration,
    /// Stop signal for the queue tasks, the pumper and the pool workers.
    /// When absent they run until process exit.
    pub stop: Option<CancellationToken>,
}

/// Executor queueing overflow with last-in-first-out priority.
///
/// Submissions enter a dynamic queue; a dedicated pumper forwards
/// dequeued jobs to the worker pool. Because the pumper may already hold
/// a dequeued job while the next submission arrives, the first couple of
/// jobs after a burst can still come out in submission order before the
/// LIFO ordering takes over.
///
/// A submission that waits longer than `max_wait` raises a cancel flag
/// its job observes before running, so stale work is rejected without
/// executing.
pub struct Lifo {
    max_wait: Duration,
    queue: DynamicQueue,
    pool: WorkerPool,
}

impl Lifo {
    /// Create the executor and spawn its queue and pumper tasks. Must be
    /// called within a Tokio runtime.
    pub fn new(config: LifoConfig) -> Self {
        let max_wait =
            if config.max_wait.is_zero() { DEFAULT_MAX_WAIT } else { config.max_wait };
        let stop = config.stop.unwrap_or_default();

        let (queue, out_rx) =
            DynamicQueue::new(stop.clone(), enqueue_at_end_policy(), lifo_dequeue_policy());
        let pool = WorkerPool::new(stop.clone());

        spawn_pumper(stop, out_rx, pool.clone());

        Self { max_wait, queue, pool }
    }
}

/// Forward dequeued jobs to the worker pool until stopped.
pub(super) fn spawn_pumper(
    stop: CancellationToken,
    mut out_rx: tokio::sync::mpsc::Receiver<Job>,
    pool: WorkerPool,
) {
    tokio::spawn(async move {
        loop {
            let job = tokio::select! {
                _ = stop.cancelled() => break,
                job = out_rx.recv() => job,
            };
            let Some(job) = job else { break };

            let handed = tokio::select! {
                _ = stop.cancelled() => break,
                handed = pool.handoff(job) => handed,
            };
            if handed.is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl Executor for Lifo {
    async fn execute(&self, job: ExecuteJob) -> Result<(), Error> {
        let canceled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&canceled);
        let (result_tx, result_rx) = oneshot::channel();

        let wrapped: Job = Box::new(move || -> JobFuture {
            Box::pin(async move {
                // The submitter may have given up while this job sat in
                // the queue; in that case don't execute at all.
                if flag.load(Ordering::Acquire) {
                    let _ = result_tx.send(Err(Error::RejectedExecution));
                    return;
                }
                let _ = result_tx.send(job().await);
            })
        });

        if self.queue.sender().send(wrapped).await.is_err() {
            return Err(Error::RejectedExecution);
        }

        tokio::select! {
            result = result_rx => match result {
                Ok(result) => result,
                Err(_) => Err(Error::RejectedExecution),
            },
            _ = tokio::time::sleep(self.max_wait) => {
                canceled.store(true, Ordering::Release);
                Err(Error::RejectedExecution)
            }
        }
    }

    fn set_worker_quantity(&self, quantity: usize) {
        self.pool.set_worker_quantity(quantity);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::runner::OperationFuture;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_is_served_newest_first_modulo_stragglers() {
        let lifo = Arc::new(Lifo::new(LifoConfig {
            max_wait: Duration::from_secs(10),
            stop: None,
        }));
        lifo.set_worker_quantity(1);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for tag in 0..6u32 {
            let lifo = Arc::clone(&lifo);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                lifo.execute(Box::new(move || -> OperationFuture {
                    Box::pin(async move {
                        if let Ok(mut order) = order.lock() {
                            order.push(tag);
                        }
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(())
                    })
                }))
                .await
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let order = order.lock().unwrap().clone();
        assert_eq!(order.len(), 6);

        // The pumper forwards the first submissions in arrival order
        // before the backlog builds up (the straggler effect), so the
        // burst starts FIFO; once the queue is deep the LIFO priority
        // must reorder the rest.
        assert_eq!(order[0], 0, "straggler effect lost: {order:?}");
        assert_ne!(order, vec![0, 1, 2, 3, 4, 5], "no LIFO reordering happened: {order:?}");
    }

    #[tokio::test]
    async fn test_stale_submission_is_rejected_without_executing() {
        let lifo = Lifo::new(LifoConfig { max_wait: Duration::from_millis(30), stop: None });
        // No workers: the job can only rot in the queue.
        lifo.set_worker_quantity(0);

        let executed = Arc::new(AtomicBool::new(false));
        let executed_in_job = Arc::clone(&executed);
        let result = lifo
            .execute(Box::new(move || -> OperationFuture {
                Box::pin(async move {
                    executed_in_job.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .await;

        assert_eq!(result, Err(Error::RejectedExecution));

        // Even once a worker shows up, the cancelled job must not run.
        lifo.set_worker_quantity(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!executed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_executes_result_passthrough() {
        let lifo = Lifo::new(LifoConfig::default());
        lifo.set_worker_quantity(2);

        let err = Error::msg("boom");
        let cloned = err.clone();
        let result = lifo
            .execute(Box::new(move || -> OperationFuture {
                Box::pin(async move { Err(cloned) })
            }))
            .await;

        assert_eq!(result, Err(err));
    }
}
