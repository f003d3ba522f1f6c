//! Fallback runner executing a secondary operation on failure.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::errors::Error;
use crate::runner::{sanitize, Middleware, Operation, Runner};

/// Runner that invokes a fallback operation when the primary execution
/// fails. On success the fallback is never invoked; on failure the
/// fallback's result is returned in place of the primary error.
pub struct Fallback {
    fallback: Operation,
    inner: Arc<dyn Runner>,
}

impl Fallback {
    /// Create a fallback runner delegating to the identity runner.
    pub fn new(fallback: Operation) -> Self {
        Self::with_inner(fallback, sanitize(None))
    }

    /// Create a fallback runner delegating to `inner`.
    pub fn with_inner(fallback: Operation, inner: Arc<dyn Runner>) -> Self {
        Self { fallback, inner }
    }

    /// Create a fallback middleware for chain composition.
    pub fn middleware(fallback: Operation) -> Middleware {
        Box::new(move |inner| Arc::new(Fallback::with_inner(Arc::clone(&fallback), inner)))
    }
}

#[async_trait]
impl Runner for Fallback {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        match self.inner.run(ctx.clone(), op).await {
            Ok(()) => Ok(()),
            Err(err) => {
                debug!(%err, "primary execution failed, running fallback");
                (self.fallback)(ctx).await
            }
        }
    }
}
