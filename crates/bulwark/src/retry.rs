//! Retry runner with exponential backoff and full jitter.
//!
//! Retries the inner execution up to a configured number of times. With
//! backoff enabled (the default) the wait before attempt `i` is drawn
//! uniformly from `[0, wait_base * 2^i)` and rounded to the millisecond,
//! following the "full jitter" scheme; with backoff disabled the wait is
//! the fixed base duration.
//!
//! The sleep between attempts is not raced against the context: a
//! cancellation arriving mid-sleep is observed at the start of the next
//! attempt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::context::Context;
use crate::errors::Error;
use crate::runner::{sanitize, Middleware, Operation, Runner};

const DEFAULT_WAIT_BASE: Duration = Duration::from_millis(20);
const DEFAULT_TIMES: u32 = 3;

/// Configuration for the retry runner.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Base unit duration of the waits between attempts.
    pub wait_base: Duration,
    /// Number of retries on error before giving up. The total number of
    /// attempts is `times + 1`: the original execution is not a retry.
    pub times: u32,
    /// Disable exponential backoff and jitter; every wait is `wait_base`.
    pub disable_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { wait_base: DEFAULT_WAIT_BASE, times: DEFAULT_TIMES, disable_backoff: false }
    }
}

impl RetryConfig {
    fn sanitized(mut self) -> Self {
        if self.wait_base.is_zero() {
            self.wait_base = DEFAULT_WAIT_BASE;
        }
        if self.times == 0 {
            self.times = DEFAULT_TIMES;
        }
        self
    }
}

/// Runner that retries failed executions.
pub struct Retry {
    config: RetryConfig,
    inner: Arc<dyn Runner>,
}

impl Retry {
    /// Create a retry runner delegating to the identity runner.
    pub fn new(config: RetryConfig) -> Self {
        Self::with_inner(config, sanitize(None))
    }

    /// Create a retry runner delegating to `inner`.
    pub fn with_inner(config: RetryConfig, inner: Arc<dyn Runner>) -> Self {
        Self { config: config.sanitized(), inner }
    }

    /// Create a retry middleware for chain composition.
    pub fn middleware(config: RetryConfig) -> Middleware {
        Box::new(move |inner| Arc::new(Retry::with_inner(config.clone(), inner)))
    }

    fn wait_for_attempt(&self, attempt: u32) -> Duration {
        if self.config.disable_backoff {
            return self.config.wait_base;
        }

        // Exponential backoff with full jitter, rounded to the millisecond.
        // https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
        let ceiling = self.config.wait_base.as_secs_f64() * 2f64.powi(attempt as i32);
        let jittered = ceiling * rand::thread_rng().gen::<f64>();
        Duration::from_millis((jittered * 1000.0).round() as u64)
    }
}

#[async_trait]
impl Runner for Retry {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        let mut attempt = 0;
        loop {
            // Only the retries are measured, not the original attempt.
            if attempt != 0 {
                ctx.recorder().inc_retry();
            }

            let err = match self.inner.run(ctx.clone(), Arc::clone(&op)).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let wait = self.wait_for_attempt(attempt);
            debug!(attempt, ?wait, "execution failed, backing off before retry");
            tokio::time::sleep(wait).await;

            if attempt == self.config.times {
                return Err(err);
            }
            attempt += 1;
        }
    }
}
