//! FIFO executor: blocked submissions are admitted in arrival order.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::errors::Error;

use super::{ExecuteJob, Executor, Job, JobFuture, WorkerPool};

const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1);

/// Configuration for the [`Fifo`] executor.
#[derive(Debug, Clone, Default)]
pub struct FifoConfig {
    /// Maximum time a submission waits for a worker before being
    /// rejected. Zero falls back to one second.
    pub max_wait: Duration,
    /// Stop signal for the pool workers. When absent the workers run
    /// until process exit.
    pub stop: Option<CancellationToken>,
}

/// Executor admitting contending submissions first-come first-served.
///
/// Contending submitters all block on the pool handoff, which serves
/// waiters in arrival order, so the handoff itself establishes the
/// priority; jobs reach the workers in submission order.
pub struct Fifo {
    max_wait: Duration,
    pool: WorkerPool,
}

impl Fifo {
    /// Create the executor. Must be called within a Tokio runtime.
    pub fn new(config: FifoConfig) -> Self {
        let max_wait =
            if config.max_wait.is_zero() { DEFAULT_MAX_WAIT } else { config.max_wait };
        let stop = config.stop.unwrap_or_default();
        Self { max_wait, pool: WorkerPool::new(stop) }
    }
}

#[async_trait]
impl Executor for Fifo {
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
