//! Adaptive LIFO + CoDel executor.
//!
//! Based on the controlled-delay (CoDel) queue management algorithm and
//! on adaptive LIFO queueing, the combination Facebook described for
//! resilient request queues. While the queue keeps draining, submissions
//! queue FIFO with the full `codel_interval` as admission timeout. When
//! bufferbloat is detected (the queue has not been empty for longer than
//! `codel_interval`) the dequeue priority flips to LIFO and the admission
//! timeout shrinks to `codel_target_delay`: under overload the newest
//! work is the most likely to still matter to its caller, and the old
//! backlog is timed out aggressively. Once the queue drains the next
//! submission reverts the policy, so the executor heals itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::Error;

use super::lifo::spawn_pumper;
use super::{
    enqueue_at_end_policy, fifo_dequeue_policy, lifo_dequeue_policy, DynamicQueue, ExecuteJob,
    Executor, Job, JobFuture, WorkerPool,
};

const DEFAULT_CODEL_TARGET_DELAY: Duration = Duration::from_millis(5);
const DEFAULT_CODEL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the [`AdaptiveLifoCodel`] executor.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveLifoCodelConfig {
    /// Admission timeout applied while congestion is detected. Zero falls
    /// back to 5 ms.
    pub codel_target_delay: Duration,
    /// Regular admission timeout, and the queueing delay past which the
    /// executor considers itself congested. Zero falls back to 100 ms.
    pub codel_interval: Duration,
    /// Stop signal for the queue tasks, the pumper and the pool workers.
    /// When absent they run until process exit.
    pub stop: Option<CancellationToken>,
}

/// Executor that switches queueing priority and admission timeout under
/// detected congestion.
pub struct AdaptiveLifoCodel {
    target_delay: Duration,
    interval: Duration,
    queue: DynamicQueue,
    pool: WorkerPool,
}

impl AdaptiveLifoCodel {
    /// Create the executor and spawn its queue and pumper tasks. Must be
    /// called within a Tokio runtime.
    pub fn new(config: AdaptiveLifoCodelConfig) -> Self {
        let target_delay = if config.codel_target_delay.is_zero() {
            DEFAULT_CODEL_TARGET_DELAY
        } else {
            config.codel_target_delay
        };
        let interval = if config.codel_interval.is_zero() {
            DEFAULT_CODEL_INTERVAL
        } else {
            config.codel_interval
        };
        let stop = config.stop.unwrap_or_default();

        // Uncongested regime: FIFO priority.
        let (queue, out_rx) =
            DynamicQueue::new(stop.clone(), enqueue_at_end_policy(), fifo_dequeue_policy());
        let pool = WorkerPool::new(stop.clone());

        spawn_pumper(stop, out_rx, pool.clone());

        Self { target_delay, interval, queue, pool }
    }

    /// Bufferbloat detection: the queue counts as congested once it has
    /// gone a full interval without being empty.
    fn congested(&self) -> bool {
        self.queue.since_last_empty() > self.interval
    }
}

#[async_trait]
impl Executor for AdaptiveLifoCodel {
    async fn execute(&self, job: ExecuteJob) -> Result<(), Error> {
        // Pick the regime for this submission. Congestion flips the
        // dequeue priority to LIFO and arms the aggressive timeout; a
        // drained queue flips it back.
        let timeout = if self.congested() {
            debug!("queue congested, switching to LIFO dequeue and target delay");
            self.queue.set_dequeue_policy(lifo_dequeue_policy());
            self.target_delay
        } else {
            self.queue.set_dequeue_policy(fifo_dequeue_policy());
            self.interval
        };

        let canceled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&canceled);
        let (result_tx, result_rx) = oneshot::channel();

        let wrapped: Job = Box::new(move || -> JobFuture {
            Box::pin(async move {
                // Don't execute work an upper layer has already given up
                // on.
                if flag.load(Ordering::Acquire) {
                    return;
                }
                let _ = result_tx.send(job().await);
            })
        });

        // Enqueue from a detached task so a full in-channel cannot block
        // the admission race below.
        let sender = self.queue.sender();
        tokio::spawn(async move {
            let _ = sender.send(wrapped).await;
        });

        tokio::select! {
            result = result_rx => match result {
                Ok(result) => result,
                Err(_) => Err(Error::RejectedExecution),
            },
            _ = tokio::time::sleep(timeout) => {
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

    fn tagged_job(tag: u32, order: Arc<Mutex<Vec<u32>>>, work: Duration) -> ExecuteJob {
        Box::new(move || -> OperationFuture {
            Box::pin(async move {
                if let Ok(mut order) = order.lock() {
                    order.push(tag);
                }
                tokio::time::sleep(work).await;
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_uncongested_regime_is_fifo() {
        let codel = Arc::new(AdaptiveLifoCodel::new(AdaptiveLifoCodelConfig {
            codel_interval: Duration::from_secs(1),
            ..Default::default()
        }));
        codel.set_worker_quantity(1);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for tag in 0..4u32 {
            let codel = Arc::clone(&codel);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                codel.execute(tagged_job(tag, order, Duration::from_millis(5))).await
            }));
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_congestion_rejects_stale_work_and_heals() {
        let codel = Arc::new(AdaptiveLifoCodel::new(AdaptiveLifoCodelConfig {
            codel_target_delay: Duration::from_millis(5),
            codel_interval: Duration::from_millis(50),
            stop: None,
        }));
        codel.set_worker_quantity(1);

        let order = Arc::new(Mutex::new(Vec::new()));

        // Saturate the single worker so the queue never empties for well
        // over an interval.
        let mut handles = Vec::new();
        for tag in 0..8u32 {
            let codel = Arc::clone(&codel);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                codel.execute(tagged_job(tag, order, Duration::from_millis(60))).await
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut rejected = 0;
        for handle in handles {
            if handle.await.unwrap() == Err(Error::RejectedExecution) {
                rejected += 1;
            }
        }
        assert!(rejected > 0, "expected congestion to reject stale work");

        // Let the queue drain completely, then verify the regime healed
        // back to FIFO with the full interval.
        tokio::time::sleep(Duration::from_millis(150)).await;

        let healed_order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for tag in 0..3u32 {
            let codel = Arc::clone(&codel);
            let order = Arc::clone(&healed_order);
            handles.push(tokio::spawn(async move {
                codel.execute(tagged_job(tag, order, Duration::from_millis(2))).await
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*healed_order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_timed_out_submission_never_executes() {
        let codel = AdaptiveLifoCodel::new(AdaptiveLifoCodelConfig {
            codel_interval: Duration::from_millis(30),
            ..Default::default()
        });
        codel.set_worker_quantity(0);

        let executed = Arc::new(AtomicBool::new(false));
        let executed_in_job = Arc::clone(&executed);
        let result = codel
            .execute(Box::new(move || -> OperationFuture {
                Box::pin(async move {
                    executed_in_job.store(true, Ordering::SeqCst);
                    Ok(())
                })
            }))
            .await;

        assert_eq!(result, Err(Error::RejectedExecution));

        codel.set_worker_quantity(1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!executed.load(Ordering::SeqCst));
    }
}
