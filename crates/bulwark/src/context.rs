//! Per-call execution context.
//!
//! A [`Context`] travels with every execution through the runner chain. It
//! carries the cancellation token the caller controls and the telemetry
//! recorder installed by the measured runner. Cloning is cheap; child
//! contexts share cancellation lineage with their parent.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::metrics::{NoopRecorder, Recorder};

/// Ambient state for a single execution through a runner chain.
#[derive(Clone)]
pub struct Context {
    cancellation: CancellationToken,
    recorder: Arc<dyn Recorder>,
}

impl Context {
    /// Create a context with a fresh cancellation token and a no-op
    /// telemetry recorder.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a context driven by a caller-owned cancellation token.
    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation, recorder: Arc::new(NoopRecorder) }
    }

    /// The cancellation token governing this execution.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the execution has been cancelled.
    pub fn is_canceled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Return `Err(Error::ContextCanceled)` if the execution has been
    /// cancelled. Runners call this on entry so no discipline starts work
    /// on a dead execution.
    pub fn ensure_active(&self) -> Result<(), Error> {
        if self.is_canceled() {
            return Err(Error::ContextCanceled);
        }
        Ok(())
    }

    /// The telemetry recorder attached to this execution.
    pub fn recorder(&self) -> &Arc<dyn Recorder> {
        &self.recorder
    }

    /// Derive a context that shares cancellation lineage but records
    /// through the given recorder.
    pub(crate) fn with_recorder(&self, recorder: Arc<dyn Recorder>) -> Self {
        Self { cancellation: self.cancellation.clone(), recorder }
    }

    /// Derive a context with a child cancellation token. Cancelling the
    /// parent cancels the child; the child can also be cancelled on its
    /// own, which is how the timeout runner signals its deadline.
    pub(crate) fn child(&self) -> Self {
        Self { cancellation: self.cancellation.child_token(), recorder: Arc::clone(&self.recorder) }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("canceled", &self.is_canceled()).finish_non_exhaustive()
    }
}
