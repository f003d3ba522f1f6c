//! Error taxonomy shared by every runner.
//!
//! Runners either return the inner execution error unchanged or substitute
//! one of the sentinel variants defined here. Callers can match on the
//! variant to tell a rejection, a timeout or an open circuit apart from a
//! genuine execution failure.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Boxed error type used to carry arbitrary execution failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the resilience runners.
///
/// The sentinel variants compare equal by kind; [`Error::Execution`] values
/// compare equal only when they wrap the very same underlying error, so an
/// inner failure is never mistaken for a library decision.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The execution exceeded its deadline.
    #[error("timeout while executing")]
    Timeout,

    /// The context was cancelled before the execution could start.
    #[error("context canceled, execution not run")]
    ContextCanceled,

    /// The execution waited too long to be picked up by a worker.
    #[error("timeout while waiting for execution")]
    TimeoutWaitingForExecution,

    /// The circuit breaker is open and refused the execution.
    #[error("circuit breaker is open, execution rejected")]
    CircuitOpen,

    /// A synthetic failure injected by the chaos runner.
    #[error("failure injected by the chaos runner")]
    FailureInjected,

    /// An executor refused to admit the execution.
    #[error("execution rejected")]
    RejectedExecution,

    /// An arbitrary failure produced by the executed operation itself.
    #[error("execution failed: {0}")]
    Execution(Arc<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// Wrap an arbitrary error as an execution failure.
    pub fn failure(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::Execution(Arc::new(err))
    }

    /// Build an execution failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Execution(Arc::new(Message(message.into())))
    }

    /// Whether this error is one of the library sentinels rather than a
    /// failure of the executed operation.
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Error::Execution(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Timeout, Error::Timeout)
            | (Error::ContextCanceled, Error::ContextCanceled)
            | (Error::TimeoutWaitingForExecution, Error::TimeoutWaitingForExecution)
            | (Error::CircuitOpen, Error::CircuitOpen)
            | (Error::FailureInjected, Error::FailureInjected)
            | (Error::RejectedExecution, Error::RejectedExecution) => true,
            (Error::Execution(a), Error::Execution(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Error {}

/// Minimal message-only error used by [`Error::msg`].
struct Message(String);

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for Message {}

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Result type for configuration builders.
pub type ConfigResult<T> = Result<T, ConfigError>;
