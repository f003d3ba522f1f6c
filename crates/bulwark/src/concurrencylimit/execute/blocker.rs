//! Blocking executor: wait for a free worker, bounded by a timeout.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;

use super::{ExecuteJob, Executor, Job, JobFuture, WorkerPool};

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Configuration for the [`Blocker`] executor.
#[derive(Debug, Clone, Default)]
pub struct BlockerConfig {
    /// Maximum time a submission waits for a worker before being
    /// rejected. Zero falls back to one second.
    pub max_wait: Duration,
    /// Stop signal for the pool workers. When absent the workers run
    /// until process exit.
    pub stop: Option<CancellationToken>,
}

/// Executor that hands the job straight to the worker pool, blocking the
/// submitter until a worker picks it up or the wait bound expires, in
/// which case the execution is rejected.
pub struct Blocker {
    max_wait: Duration,
    pool: WorkerPool,
}

impl Blocker {
    /// Create the executor. Must be called within a Tokio runtime.
    pub fn new(config: BlockerConfig) -> Self {
        let max_wait =
            if config.max_wait.is_zero() { DEFAULT_MAX_WAIT } else { config.max_wait };
        let stop = config.stop.unwrap_or_default();
        Self { max_wait, pool: WorkerPool::new(stop) }
    }
}

#[async_trait]
impl Executor for Blocker {
    async fn execute(&self, job: ExecuteJob) -> Result<(), Error> {
        let (result_tx, result_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || -> JobFuture {
            Box::pin(async move {
                let _ = result_tx.send(job().await);
            })
        });

        tokio::select! {
            handed = self.pool.handoff(wrapped) => {
                if handed.is_err() {
                    return Err(Error::RejectedExecution);
                }
                match result_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::RejectedExecution),
                }
            }
            _ = tokio::time::sleep(self.max_wait) => Err(Error::RejectedExecution),
        }
    }

    fn set_worker_quantity(&self, quantity: usize) {
        self.pool.set_worker_quantity(quantity);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use crate::runner::OperationFuture;

    use super::*;

    fn counting_job(counter: Arc<AtomicU32>) -> ExecuteJob {
        Box::new(move || -> OperationFuture {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_executes_with_available_worker() {
        let blocker = Blocker::new(BlockerConfig::default());
        blocker.set_worker_quantity(1);

        let counter = Arc::new(AtomicU32::new(0));
        blocker.execute(counting_job(Arc::clone(&counter))).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rejects_when_saturated() {
        let blocker = Arc::new(Blocker::new(BlockerConfig {
            max_wait: Duration::from_millis(30),
            stop: None,
        }));
        blocker.set_worker_quantity(1);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let blocker = Arc::clone(&blocker);
            handles.push(tokio::spawn(async move {
                blocker
                    .execute(Box::new(move || -> OperationFuture {
                        Box::pin(async move {
                            tokio::time::sleep(Duration::from_millis(200)).await;
                            Ok(())
                        })
                    }))
                    .await
            }));
        }

        let mut ok = 0;
        let mut rejected = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(Error::RejectedExecution) => rejected += 1,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        // Handoff is a rendezvous with the single worker: one job runs,
        // the rest are rejected.
        assert_eq!(ok, 1);
        assert_eq!(rejected, 4);
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let blocker = Blocker::new(BlockerConfig::default());
        blocker.set_worker_quantity(1);

        let err = Error::msg("boom");
        let cloned = err.clone();
        let result = blocker
            .execute(Box::new(move || -> OperationFuture {
                Box::pin(async move { Err(cloned) })
            }))
            .await;

        assert_eq!(result, Err(err));
    }
}
