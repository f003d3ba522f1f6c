//! Execution workflows backing the concurrency limiter.
//!
//! An [`Executor`] admits jobs into a worker pool whose size follows the
//! concurrency limit. The executors differ in what happens when every
//! worker is busy: block and wait, queue with FIFO or LIFO priority, or
//! adapt the queueing priority and admission timeout to detected
//! congestion.

mod blocker;
mod codel;
mod fifo;
mod lifo;
mod pool;
mod queue;

pub use blocker::{Blocker, BlockerConfig};
pub use codel::{AdaptiveLifoCodel, AdaptiveLifoCodelConfig};
pub use fifo::{Fifo, FifoConfig};
pub use lifo::{Lifo, LifoConfig};

pub(crate) use pool::WorkerPool;
pub(crate) use queue::{
    enqueue_at_end_policy, fifo_dequeue_policy, lifo_dequeue_policy, DynamicQueue,
};

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::errors::Error;
use crate::runner::OperationFuture;

/// A unit of work admitted by an executor. The job reports its result
/// through a channel it captures, so the pool-facing future yields
/// nothing.
pub(crate) type Job = Box<dyn FnOnce() -> JobFuture + Send>;
pub(crate) type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A fallible unit of work handed to [`Executor::execute`].
pub type ExecuteJob = Box<dyn FnOnce() -> OperationFuture + Send>;

/// Limits execution through a resizable worker pool.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Execute the job and return its result, or
    /// [`Error::RejectedExecution`] when admission fails.
    async fn execute(&self, job: ExecuteJob) -> Result<(), Error>;

    /// Resize the worker pool to exactly `quantity` workers.
    fn set_worker_quantity(&self, quantity: usize);
}
