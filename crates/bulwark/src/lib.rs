//! Composable resilience runners for async Rust.
//!
//! Everything in this crate is built on the [`Runner`] contract: a runner
//! executes a unit of work under one resilience discipline and delegates
//! to an inner runner, so disciplines chain like middleware. The provided
//! runners cover:
//!
//! - **Retry** with exponential backoff and full jitter ([`retry`])
//! - **Timeout** with cooperative cancellation ([`timeout`])
//! - **Fallback** to a secondary operation ([`fallback`])
//! - **Bulkhead** bounding concurrent executions ([`bulkhead`])
//! - **Circuit breaker** with a sliding bucketed metrics window
//!   ([`circuitbreaker`])
//! - **Adaptive concurrency limiting** with pluggable limit algorithms
//!   and executors ([`concurrencylimit`])
//! - **Chaos injection** of latency and synthetic failures ([`chaos`])
//!
//! Telemetry flows through the pluggable [`metrics::Recorder`] sink; the
//! library does not depend on any exporter.
//!
//! # Quick start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark::retry::{Retry, RetryConfig};
//! use bulwark::timeout::{Timeout, TimeoutConfig};
//! use bulwark::{chain, operation, Context, Runner};
//!
//! # async fn example() -> Result<(), bulwark::Error> {
//! // Outer-to-inner: the timeout bounds all retry attempts together.
//! let runner = chain(vec![
//!     Timeout::middleware(TimeoutConfig { timeout: Duration::from_secs(2) }),
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
//!
//! # Cancellation
//!
//! Every execution carries a [`Context`] with a cancellation token. A
//! runner refuses to start work on a cancelled context and returns
//! [`Error::ContextCanceled`]; long-running operations should observe
//! `ctx.cancellation()` to exit early when a deadline fires upstream.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod bulkhead;
pub mod chaos;
pub mod circuitbreaker;
pub mod concurrencylimit;
pub mod context;
pub mod errors;
pub mod fallback;
pub mod metrics;
pub mod retry;
pub mod runner;
pub mod timeout;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the contract types for convenience
// ------------------------
pub use context::Context;
pub use errors::{BoxError, ConfigError, ConfigResult, Error};
pub use runner::{
    chain, chain_with, operation, sanitize, Identity, Middleware, Operation, OperationFuture,
    Runner,
};
