//! Telemetry sink for the resilience runners.
//!
//! Runners emit counters, gauges and timing observations through the
//! [`Recorder`] trait. The default recorder is a no-op; applications plug
//! in their own implementation (Prometheus, OpenTelemetry, StatsD...)
//! without the library depending on any exporter. The recorder reaches the
//! runners through the execution [`Context`]: wrap the outermost runner
//! with [`measured`] and every inner discipline records against the same
//! identified recorder.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::context::Context;
use crate::errors::Error;
use crate::runner::{sanitize, Operation, Runner};

/// Receiver for the measurements emitted by the runners.
///
/// All methods default to a no-op so implementations only override what
/// they care about. Implementations must be cheap and non-blocking; they
/// are called on the hot path of every execution.
pub trait Recorder: Send + Sync + std::fmt::Debug {
    /// Derive a recorder scoped to the given chain identifier. Every
    /// measurement taken through the derived recorder is attributed to
    /// that identifier.
    fn with_id(&self, id: &str) -> Arc<dyn Recorder>;

    /// Observe a whole-chain execution and whether it succeeded.
    fn observe_command_execution(&self, _start: Instant, _success: bool) {}

    /// A retry attempt was made (the original attempt does not count).
    fn inc_retry(&self) {}

    /// An execution was cut by the timeout runner.
    fn inc_timeout(&self) {}

    /// An execution was handed to the bulkhead.
    fn inc_bulkhead_queued(&self) {}

    /// A bulkhead execution started running.
    fn inc_bulkhead_processed(&self) {}

    /// An execution timed out waiting for bulkhead admission.
    fn inc_bulkhead_timeout(&self) {}

    /// The circuit breaker moved to `state`.
    fn inc_circuitbreaker_state(&self, _state: &str) {}

    /// The chaos runner injected a fault of the given kind.
    fn inc_chaos_injected_failure(&self, _kind: &str) {}

    /// Gauge: executions submitted to the concurrency limiter and not yet
    /// returned to the caller.
    fn set_concurrency_limit_inflight_executions(&self, _quantity: usize) {}

    /// Gauge: executions currently running user code.
    fn set_concurrency_limit_executing_executions(&self, _quantity: usize) {}

    /// The limiter result policy classified an execution outcome.
    fn inc_concurrency_limit_result(&self, _result: &str) {}

    /// Gauge: the concurrency limit computed by the limiter algorithm.
    fn set_concurrency_limit_limiter_limit(&self, _limit: usize) {}

    /// Observe how long an execution waited in an executor queue.
    fn observe_concurrency_limit_queued_time(&self, _start: Instant) {}
}

/// Recorder that discards every measurement. Used when no recorder has
/// been installed on the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn with_id(&self, _id: &str) -> Arc<dyn Recorder> {
        Arc::new(NoopRecorder)
    }
}

/// Wrap a runner so the whole chain below it is measured.
///
/// Installs `recorder.with_id(id)` on the context before delegating, and
/// observes the chain execution result. Place this as the outermost runner
/// so every discipline in the chain reports against the same identifier.
pub fn measured(id: &str, recorder: Arc<dyn Recorder>, inner: Option<Arc<dyn Runner>>) -> Arc<dyn Runner> {
    Arc::new(Measured { recorder: recorder.with_id(id), inner: sanitize(inner) })
}

struct Measured {
    recorder: Arc<dyn Recorder>,
    inner: Arc<dyn Runner>,
}

#[async_trait]
impl Runner for Measured {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        let start = Instant::now();
        let ctx = ctx.with_recorder(Arc::clone(&self.recorder));
        let result = self.inner.run(ctx, op).await;
        self.recorder.observe_command_execution(start, result.is_ok());

        result
    }
}
