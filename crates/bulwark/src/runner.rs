//! The execution contract every resilience discipline plugs into.
//!
//! A [`Runner`] executes an [`Operation`] under its discipline and
//! delegates to an inner runner, down to the terminal [`Identity`] runner
//! which invokes the operation itself. Runners compose like middleware:
//! a [`Middleware`] wraps an inner runner and produces an outer one, and
//! [`chain`] folds an ordered list of middlewares over the identity
//! runner. Chains are built once and are safe for concurrent calls.
//!
//! # Examples
//!
//! ```rust
//! use bulwark::retry::{Retry, RetryConfig};
//! use bulwark::timeout::{Timeout, TimeoutConfig};
//! use bulwark::{chain, operation, Context, Runner};
//!
//! # async fn example() -> Result<(), bulwark::Error> {
//! let runner = chain(vec![
//!     Timeout::middleware(TimeoutConfig::default()),
//!     Retry::middleware(RetryConfig::default()),
//! ]);
//!
//! runner
//!     .run(
//!         Context::new(),
//!         operation(|_ctx| async move {
//!             // fallible work goes here
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::errors::Error;

/// Future produced by one invocation of an [`Operation`].
pub type OperationFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// The unit of work executed under resilience disciplines.
///
/// Shared behind an `Arc` because runners such as retry invoke the same
/// unit several times. The library never interprets what the operation
/// does; it only observes success or failure.
pub type Operation = Arc<dyn Fn(Context) -> OperationFuture + Send + Sync>;

/// Adapt an async closure into an [`Operation`].
pub fn operation<F, Fut>(f: F) -> Operation
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// A composable execution wrapper.
///
/// Implementations perform their discipline (admit, time, limit, break,
/// retry...) and either delegate to an inner runner or return a decision
/// error from the sentinel taxonomy. Every implementation refuses to start
/// work on an already-cancelled context.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run the unit of execution passed in `op`.
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error>;
}

/// Terminal runner that invokes the operation after a cancellation check.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl Runner for Identity {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        // Only execute if the context has not been cancelled on the way here.
        ctx.ensure_active()?;
        op(ctx).await
    }
}

/// A factory wrapping an inner runner into an outer one.
pub type Middleware = Box<dyn Fn(Arc<dyn Runner>) -> Arc<dyn Runner> + Send + Sync>;

/// Replace a missing inner runner with the terminal [`Identity`] runner.
pub fn sanitize(inner: Option<Arc<dyn Runner>>) -> Arc<dyn Runner> {
    inner.unwrap_or_else(|| Arc::new(Identity))
}

/// Compose middlewares outer-to-inner over the [`Identity`] runner.
///
/// `chain(vec![m1, m2, m3])` produces `m1(m2(m3(Identity)))`.
pub fn chain(middlewares: Vec<Middleware>) -> Arc<dyn Runner> {
    chain_with(middlewares, Arc::new(Identity))
}

/// Compose middlewares outer-to-inner over a custom terminal runner.
pub fn chain_with(middlewares: Vec<Middleware>, terminal: Arc<dyn Runner>) -> Arc<dyn Runner> {
    let mut runner = terminal;
    for middleware in middlewares.into_iter().rev() {
        runner = middleware(runner);
    }
    runner
}
