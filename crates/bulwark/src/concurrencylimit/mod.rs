//! Adaptive concurrency limiting runner.
//!
//! Two orthogonal plug-in points glued by a runner and a result policy:
//! a [`Limiter`] algorithm computes what the concurrency limit should be
//! from sampled execution outcomes, and an [`Executor`] admits work into
//! a worker pool that is resized to follow that limit. The result policy
//! classifies each execution outcome as success, failure or ignore for
//! the limiter.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use bulwark::concurrencylimit::execute::{AdaptiveLifoCodel, AdaptiveLifoCodelConfig};
//! use bulwark::concurrencylimit::limit::{AimdConfig, AimdLimiter};
//! use bulwark::concurrencylimit::{ConcurrencyLimit, ConcurrencyLimitConfig};
//! use bulwark::{operation, Context, Runner};
//!
//! # async fn example() -> Result<(), bulwark::Error> {
//! let runner = ConcurrencyLimit::new(ConcurrencyLimitConfig {
//!     limiter: Some(Arc::new(AimdLimiter::new(AimdConfig::default()))),
//!     executor: Some(Arc::new(AdaptiveLifoCodel::new(AdaptiveLifoCodelConfig::default()))),
//!     ..Default::default()
//! });
//!
//! runner.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await?;
//! # Ok(())
//! # }
//! ```

pub mod execute;
pub mod limit;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::context::Context;
use crate::errors::Error;
use crate::runner::{sanitize, Middleware, Operation, OperationFuture, Runner};

use execute::{Blocker, BlockerConfig, ExecuteJob, Executor};
use limit::{Limiter, Outcome, StaticLimiter};

/// Classifies the result of an execution for the limit algorithm.
///
/// Depending on the workload, an error may mean the protected resource is
/// unhealthy (count it as failure), or carry no signal about it at all
/// (ignore it and adapt on latency only).
pub type ResultPolicy = Arc<dyn Fn(&Context, &Result<(), Error>) -> Outcome + Send + Sync>;

/// Treat every error that did not come from the limiter itself as a
/// failure; admission rejections are ignored.
pub fn failure_on_external_error_policy() -> ResultPolicy {
    Arc::new(|_ctx, result| match result {
        Ok(()) => Outcome::Success,
        Err(Error::RejectedExecution) => Outcome::Ignore,
        Err(_) => Outcome::Failure,
    })
}

/// Never fail the algorithm; errors carry no signal and only latency
/// drives adaptation.
pub fn no_failure_policy() -> ResultPolicy {
    Arc::new(|_ctx, result| match result {
        Ok(()) => Outcome::Success,
        Err(_) => Outcome::Ignore,
    })
}

/// Treat admission rejections as failures and every other error as
/// carrying no signal. This is the default policy.
pub fn failure_on_rejected_policy() -> ResultPolicy {
    Arc::new(|_ctx, result| match result {
        Ok(()) => Outcome::Success,
        Err(Error::RejectedExecution) => Outcome::Failure,
        Err(_) => Outcome::Ignore,
    })
}

/// Configuration for the concurrency limit runner.
#[derive(Clone, Default)]
pub struct ConcurrencyLimitConfig {
    /// Limit algorithm. Defaults to a static limit of 10.
    pub limiter: Option<Arc<dyn Limiter>>,
    /// Execution workflow. Defaults to a [`Blocker`] executor.
    pub executor: Option<Arc<dyn Executor>>,
    /// Outcome classification for the limiter. Defaults to
    /// [`failure_on_rejected_policy`].
    pub execution_result_policy: Option<ResultPolicy>,
}

impl fmt::Debug for ConcurrencyLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyLimitConfig")
            .field("limiter", &self.limiter.is_some())
            .field("executor", &self.executor.is_some())
            .field("execution_result_policy", &self.execution_result_policy.is_some())
            .finish()
    }
}

/// Runner that bounds and adapts the concurrency of executions.
pub struct ConcurrencyLimit {
    limiter: Arc<dyn Limiter>,
    executor: Arc<dyn Executor>,
    policy: ResultPolicy,
    inflight: AtomicUsize,
    executing: Arc<AtomicUsize>,
    inner: Arc<dyn Runner>,
}

impl ConcurrencyLimit {
    /// Create a concurrency limit runner delegating to the identity
    /// runner.
    ///
    /// Must be called within a Tokio runtime: the executor's background
    /// tasks are spawned at construction.
    pub fn new(config: ConcurrencyLimitConfig) -> Self {
        Self::with_inner(config, sanitize(None))
    }

    /// Create a concurrency limit runner delegating to `inner`.
    pub fn with_inner(config: ConcurrencyLimitConfig, inner: Arc<dyn Runner>) -> Self {
        let limiter =
            config.limiter.unwrap_or_else(|| Arc::new(StaticLimiter::new(10)));
        let executor = config
            .executor
            .unwrap_or_else(|| Arc::new(Blocker::new(BlockerConfig::default())));
        let policy =
            config.execution_result_policy.unwrap_or_else(failure_on_rejected_policy);

        // Start the pool at the limiter's initial limit.
        executor.set_worker_quantity(limiter.get_limit());

        Self {
            limiter,
            executor,
            policy,
            inflight: AtomicUsize::new(0),
            executing: Arc::new(AtomicUsize::new(0)),
            inner,
        }
    }

    /// Create a concurrency limit middleware for chain composition. The
    /// limiter and executor are shared by every chain built from it.
    pub fn middleware(config: ConcurrencyLimitConfig) -> Middleware {
        Box::new(move |inner| Arc::new(ConcurrencyLimit::with_inner(config.clone(), inner)))
    }
}

#[async_trait]
impl Runner for ConcurrencyLimit {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        let start = Instant::now();
        let recorder = Arc::clone(ctx.recorder());

        let inflight = self.inflight.fetch_add(1, Ordering::AcqRel) + 1;
        recorder.set_concurrency_limit_inflight_executions(inflight);

        // The job wrapper measures the queued time from submission to its
        // first instruction and brackets the delegate with the executing
        // gauge.
        let queued_time = Arc::new(Mutex::new(Duration::ZERO));
        let queued_in_job = Arc::clone(&queued_time);
        let executing = Arc::clone(&self.executing);
        let job_recorder = Arc::clone(&recorder);
        let inner = Arc::clone(&self.inner);
        let job_ctx = ctx.clone();
        let submitted = Instant::now();

        let job: ExecuteJob = Box::new(move || -> OperationFuture {
            Box::pin(async move {
                *queued_in_job.lock().unwrap_or_else(PoisonError::into_inner) =
                    submitted.elapsed();
                job_recorder.observe_concurrency_limit_queued_time(submitted);

                let running = executing.fetch_add(1, Ordering::AcqRel) + 1;
                job_recorder.set_concurrency_limit_executing_executions(running);

                let result = inner.run(job_ctx, op).await;

                let running = executing.fetch_sub(1, Ordering::AcqRel) - 1;
                job_recorder.set_concurrency_limit_executing_executions(running);

                result
            })
        });

        let result = self.executor.execute(job).await;

        let inflight = self.inflight.fetch_sub(1, Ordering::AcqRel) - 1;
        recorder.set_concurrency_limit_inflight_executions(inflight);

        // Feed the algorithm, unless the outcome carries no signal.
        let outcome = (self.policy)(&ctx, &result);
        recorder.inc_concurrency_limit_result(outcome.as_str());

        if outcome != Outcome::Ignore {
            let queued =
                *queued_time.lock().unwrap_or_else(PoisonError::into_inner);
            let new_limit = self.limiter.measure_sample(start, queued, inflight, outcome);
            recorder.set_concurrency_limit_limiter_limit(new_limit);
            self.executor.set_worker_quantity(new_limit);
        }

        result
    }
}
