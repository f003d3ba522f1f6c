//! Bulkhead runner limiting concurrent executions.
//!
//! A fixed-width admission point: at most `workers` executions run at the
//! same time, and a caller waits at most `max_wait` to be admitted before
//! its execution is dropped with [`Error::TimeoutWaitingForExecution`].
//! Admission is a rendezvous with free capacity, so a burst larger than
//! the width admits exactly `workers` executions per round.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

use crate::context::Context;
use crate::errors::{ConfigError, ConfigResult, Error};
use crate::runner::{sanitize, Middleware, Operation, Runner};

const DEFAULT_WORKERS: usize = 15;

/// Configuration for the bulkhead runner.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Number of executions allowed to run concurrently.
    pub workers: usize,
    /// Maximum time an execution waits for admission. Zero means wait
    /// forever.
    pub max_wait: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { workers: DEFAULT_WORKERS, max_wait: Duration::ZERO }
    }
}

impl BulkheadConfig {
    /// Create a configuration builder.
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    fn sanitized(mut self) -> Self {
        if self.workers == 0 {
            self.workers = DEFAULT_WORKERS;
        }
        self
    }
}

/// Builder for [`BulkheadConfig`].
#[derive(Debug)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl Default for BulkheadConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.max_wait = max_wait;
        self
    }

    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        if self.config.workers == 0 {
            return Err(ConfigError::invalid("workers must be greater than 0"));
        }
        Ok(self.config)
    }
}

/// Runner that bounds concurrent executions behind a fixed-width pool.
pub struct Bulkhead {
    config: BulkheadConfig,
    permits: Arc<Semaphore>,
    inner: Arc<dyn Runner>,
}

impl Bulkhead {
    /// Create a bulkhead runner delegating to the identity runner.
    pub fn new(config: BulkheadConfig) -> Self {
        Self::with_inner(config, sanitize(None))
    }

    /// Create a bulkhead runner delegating to `inner`.
    pub fn with_inner(config: BulkheadConfig, inner: Arc<dyn Runner>) -> Self {
        let config = config.sanitized();
        Self { permits: Arc::new(Semaphore::new(config.workers)), config, inner }
    }

    /// Create a bulkhead middleware for chain composition. Every chain
    /// built from the middleware gets its own admission pool.
    pub fn middleware(config: BulkheadConfig) -> Middleware {
        Box::new(move |inner| Arc::new(Bulkhead::with_inner(config.clone(), inner)))
    }

    /// Executions currently running.
    pub fn active(&self) -> usize {
        self.config.workers - self.permits.available_permits()
    }
}

#[async_trait]
impl Runner for Bulkhead {
    #[instrument(skip(self, ctx, op), fields(active = self.active()))]
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        ctx.recorder().inc_bulkhead_queued();

        let _permit = if self.config.max_wait.is_zero() {
            match self.permits.acquire().await {
                Ok(permit) => permit,
                Err(_) => return Err(Error::RejectedExecution),
            }
        } else {
            match tokio::time::timeout(self.config.max_wait, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(Error::RejectedExecution),
                Err(_) => {
                    debug!(max_wait = ?self.config.max_wait, "timed out waiting for admission");
                    ctx.recorder().inc_bulkhead_timeout();
                    return Err(Error::TimeoutWaitingForExecution);
                }
            }
        };

        ctx.recorder().inc_bulkhead_processed();
        self.inner.run(ctx, op).await
    }
}
