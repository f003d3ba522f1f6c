//! Shared helpers for the crate's unit tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::metrics::Recorder;

/// Recorder that captures every measurement for assertions.
#[derive(Debug, Clone, Default)]
pub(crate) struct CapturingRecorder {
    pub commands: Arc<AtomicU64>,
    pub command_failures: Arc<AtomicU64>,
    pub retries: Arc<AtomicU64>,
    pub timeouts: Arc<AtomicU64>,
    pub bulkhead_queued: Arc<AtomicU64>,
    pub bulkhead_processed: Arc<AtomicU64>,
    pub bulkhead_timeouts: Arc<AtomicU64>,
    pub circuit_states: Arc<Mutex<Vec<String>>>,
    pub chaos_kinds: Arc<Mutex<Vec<String>>>,
    pub limit_results: Arc<Mutex<Vec<String>>>,
    pub limiter_limits: Arc<Mutex<Vec<usize>>>,
    pub queued_observations: Arc<AtomicU64>,
}

impl Recorder for CapturingRecorder {
    fn with_id(&self, _id: &str) -> Arc<dyn Recorder> {
        Arc::new(self.clone())
    }

    fn observe_command_execution(&self, _start: Instant, success: bool) {
        self.commands.fetch_add(1, Ordering::SeqCst);
        if !success {
            self.command_failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn inc_retry(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    fn inc_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn inc_bulkhead_queued(&self) {
        self.bulkhead_queued.fetch_add(1, Ordering::SeqCst);
    }

    fn inc_bulkhead_processed(&self) {
        self.bulkhead_processed.fetch_add(1, Ordering::SeqCst);
    }

    fn inc_bulkhead_timeout(&self) {
        self.bulkhead_timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn inc_circuitbreaker_state(&self, state: &str) {
        if let Ok(mut states) = self.circuit_states.lock() {
            states.push(state.to_string());
        }
    }

    fn inc_chaos_injected_failure(&self, kind: &str) {
        if let Ok(mut kinds) = self.chaos_kinds.lock() {
            kinds.push(kind.to_string());
        }
    }

    fn inc_concurrency_limit_result(&self, result: &str) {
        if let Ok(mut results) = self.limit_results.lock() {
            results.push(result.to_string());
        }
    }

    fn set_concurrency_limit_limiter_limit(&self, limit: usize) {
        if let Ok(mut limits) = self.limiter_limits.lock() {
            limits.push(limit);
        }
    }

    fn observe_concurrency_limit_queued_time(&self, _start: Instant) {
        self.queued_observations.fetch_add(1, Ordering::SeqCst);
    }
}
