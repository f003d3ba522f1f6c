//! Timeout runner bounding the duration of an execution.
//!
//! The inner execution is dispatched on its own task and raced against the
//! deadline. When the deadline fires first the runner returns
//! [`Error::Timeout`] and cancels the child context; the spawned task is
//! not forcibly terminated, so the inner work must observe its context for
//! cooperative early exit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::errors::Error;
use crate::runner::{sanitize, Middleware, Operation, Runner};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for the timeout runner.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Maximum duration the execution may take before it is given up as
    /// timed out.
    pub timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT }
    }
}

impl TimeoutConfig {
    fn sanitized(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

/// Runner that cuts executions exceeding a deadline.
pub struct Timeout {
    config: TimeoutConfig,
    inner: Arc<dyn Runner>,
}

impl Timeout {
    /// Create a timeout runner delegating to the identity runner.
    pub fn new(config: TimeoutConfig) -> Self {
        Self::with_inner(config, sanitize(None))
    }

    /// Create a timeout runner delegating to `inner`.
    pub fn with_inner(config: TimeoutConfig, inner: Arc<dyn Runner>) -> Self {
        Self { config: config.sanitized(), inner }
    }

    /// Create a timeout middleware for chain composition.
    pub fn middleware(config: TimeoutConfig) -> Middleware {
        Box::new(move |inner| Arc::new(Timeout::with_inner(config.clone(), inner)))
    }
}

#[async_trait]
impl Runner for Timeout {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        // The inner execution gets a child context it must observe for
        // cooperative cancellation once the deadline fires.
        let child = ctx.child();
        let deadline_token = child.cancellation().clone();
        let inner = Arc::clone(&self.inner);

        let mut handle = tokio::spawn(async move { inner.run(child, op).await });

        tokio::select! {
            result = &mut handle => match result {
                Ok(result) => result,
                Err(join_err) => Err(Error::failure(join_err)),
            },
            _ = tokio::time::sleep(self.config.timeout) => {
                debug!(timeout = ?self.config.timeout, "execution timed out");
                deadline_token.cancel();
                ctx.recorder().inc_timeout();
                Err(Error::Timeout)
            }
        }
    }
}
