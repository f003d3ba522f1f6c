//! Concurrency limit algorithms.
//!
//! A [`Limiter`] computes what the concurrency limit should be from the
//! sampled outcomes of executions, in the spirit of TCP congestion
//! control algorithms.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

/// Outcome of an execution as classified for the limit algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Treated like a success by the algorithm.
    Success,
    /// Treated like a failure by the algorithm.
    Failure,
    /// Ignored by the algorithm.
    Ignore,
}

impl Outcome {
    /// Stable identifier reported to the telemetry sink.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Ignore => "ignore",
        }
    }
}

/// Computes the concurrency limit from measured execution samples.
pub trait Limiter: Send + Sync {
    /// Measure the sample of one execution and return the limit after
    /// taking it into account.
    ///
    /// `start` is when the execution was submitted, `queued` how long it
    /// waited before running, `inflight` how many executions were
    /// submitted and not yet returned at measuring time.
    fn measure_sample(
        &self,
        start: Instant,
        queued: Duration,
        inflight: usize,
        outcome: Outcome,
    ) -> usize;

    /// The current limit.
    fn get_limit(&self) -> usize;
}

const DEFAULT_MINIMUM_LIMIT: usize = 10;
const DEFAULT_RTT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_BACKOFF_RATIO: f64 = 0.9;
const DEFAULT_INFLIGHT_FACTOR: usize = 1;

/// Configuration of the AIMD adaptive limiter.
#[derive(Debug, Clone)]
pub struct AimdConfig {
    /// Lowest limit the algorithm will go down to; also the starting
    /// limit.
    pub minimum_limit: usize,
    /// Like TCP `ssthresh`: below this limit the algorithm increases by
    /// one per sample, above it the increase slows to `1/limit`. Zero
    /// disables slow start.
    pub slow_start_threshold: usize,
    /// A success slower than this round-trip bound is measured as
    /// congestion.
    pub rtt_timeout: Duration,
    /// Multiplier applied to the limit on congestion or failure; valid
    /// range is [0.5, 1].
    pub backoff_ratio: f64,
    /// The limit only grows while `inflight > limit * factor`.
    pub limit_increment_inflight_factor: usize,
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self {
            minimum_limit: DEFAULT_MINIMUM_LIMIT,
            slow_start_threshold: 0,
            rtt_timeout: DEFAULT_RTT_TIMEOUT,
            backoff_ratio: DEFAULT_BACKOFF_RATIO,
            limit_increment_inflight_factor: DEFAULT_INFLIGHT_FACTOR,
        }
    }
}

impl AimdConfig {
    fn sanitized(mut self) -> Self {
        // Safety clamps: out-of-range values fall back to known-good
        // defaults instead of erroring.
        if !(0.5..=1.0).contains(&self.backoff_ratio) {
            self.backoff_ratio = DEFAULT_BACKOFF_RATIO;
        }
        if self.rtt_timeout.is_zero() {
            self.rtt_timeout = DEFAULT_RTT_TIMEOUT;
        }
        if self.minimum_limit == 0 {
            self.minimum_limit = DEFAULT_MINIMUM_LIMIT;
        }
        if self.limit_increment_inflight_factor == 0 {
            self.limit_increment_inflight_factor = DEFAULT_INFLIGHT_FACTOR;
        }
        self
    }
}

/// AIMD (additive increase, multiplicative decrease) adaptive limiter,
/// based on the TCP congestion control algorithm of the same name.
///
/// The limit grows additively while there is demand for it and shrinks by
/// a configured ratio when congestion is detected, either through an
/// explicit failure sample or a success whose round trip exceeded the
/// configured RTT bound.
pub struct AimdLimiter {
    config: AimdConfig,
    limit: Mutex<f64>,
}

impl AimdLimiter {
    pub fn new(config: AimdConfig) -> Self {
        let config = config.sanitized();
        Self { limit: Mutex::new(config.minimum_limit as f64), config }
    }

    fn decrease(&self, limit: &mut f64) -> usize {
        *limit = (*limit * self.config.backoff_ratio).max(self.config.minimum_limit as f64);
        *limit as usize
    }

    fn increase(&self, limit: &mut f64) -> usize {
        // Below the slow start threshold (or with slow start disabled)
        // grow by one; past it, congestion avoidance grows by 1/limit.
        if (*limit as usize) < self.config.slow_start_threshold
            || self.config.slow_start_threshold == 0
        {
            *limit += 1.0;
        } else {
            *limit += 1.0 / *limit;
        }
        *limit as usize
    }
}

impl Limiter for AimdLimiter {
    fn measure_sample(
        &self,
        start: Instant,
        _queued: Duration,
        inflight: usize,
        outcome: Outcome,
    ) -> usize {
        let mut limit = self.limit.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *limit as usize;

        match outcome {
            Outcome::Success => {
                // A slow success is congestion all the same.
                if start.elapsed() > self.config.rtt_timeout {
                    debug!(rtt_timeout = ?self.config.rtt_timeout, "slow round trip, backing off limit");
                    return self.decrease(&mut limit);
                }

                // Only grow while there is queued demand for it, otherwise
                // the limit would grow forever.
                if inflight > current * self.config.limit_increment_inflight_factor {
                    return self.increase(&mut limit);
                }

                current
            }
            Outcome::Failure => self.decrease(&mut limit),
            Outcome::Ignore => current,
        }
    }

    fn get_limit(&self) -> usize {
        *self.limit.lock().unwrap_or_else(PoisonError::into_inner) as usize
    }
}

/// Non-adaptive limiter with a constant limit. Useful for tests and for
/// deliberately static pools.
pub struct StaticLimiter {
    limit: usize,
}

impl StaticLimiter {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Limiter for StaticLimiter {
    fn measure_sample(
        &self,
        _start: Instant,
        _queued: Duration,
        _inflight: usize,
        _outcome: Outcome,
    ) -> usize {
        self.limit
    }

    fn get_limit(&self) -> usize {
        self.limit
    }
}
