//! Circuit breaker runner.
//!
//! The circuit has three states. In `closed` state executions are
//! delegated and their outcomes recorded in a sliding bucketed window of
//! request/error counters; when the window holds enough requests and the
//! error rate trips the threshold the circuit moves to `open`. In `open`
//! state executions are rejected with [`Error::CircuitOpen`] without
//! delegating; once the circuit has been open for the configured wait the
//! next incoming call moves it to `half-open`. In `half-open` state
//! executions are delegated again and, after enough of them, the circuit
//! closes if none failed or reopens otherwise. Every state change resets
//! the window.
//!
//! # Examples
//!
//! ```rust
//! use bulwark::circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
//! use bulwark::{operation, Context, Runner};
//!
//! # async fn example() -> Result<(), bulwark::Error> {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig {
//!     minimum_request_to_open: 10,
//!     ..Default::default()
//! });
//!
//! breaker.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await?;
//! # Ok(())
//! # }
//! ```

mod window;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::context::Context;
use crate::errors::{ConfigError, ConfigResult, Error};
use crate::metrics::Recorder;
use crate::runner::{sanitize, Middleware, Operation, Runner};

use window::BucketWindow;

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations so state timing can be tested without real
/// delays.
pub trait Clock: Send + Sync + 'static {
    /// Get the current instant (monotonic time).
    fn now(&self) -> Instant;
}

/// Real system clock implementation for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic testing.
///
/// Allows tests to control time progression without actual delays.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant.
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Get the current elapsed time.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

//==============================================================================
// Configuration
//==============================================================================

const DEFAULT_ERROR_PERCENT_THRESHOLD: u32 = 50;
const DEFAULT_MINIMUM_REQUEST_TO_OPEN: u64 = 20;
const DEFAULT_SUCCESSFUL_REQUIRED: u64 = 1;
const DEFAULT_WAIT_IN_OPEN: Duration = Duration::from_secs(5);
const DEFAULT_BUCKET_QUANTITY: usize = 10;
const DEFAULT_BUCKET_DURATION: Duration = Duration::from_secs(1);

/// Configuration for the circuit breaker runner. Zero values fall back to
/// the defaults, which follow the classic Hystrix settings.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Error percentage over the window required to open the circuit.
    pub error_percent_threshold_to_open: u32,
    /// Minimum executions recorded in the window before the circuit may
    /// open.
    pub minimum_request_to_open: u64,
    /// Executions checked in half-open state before deciding to close or
    /// reopen.
    pub successful_required_on_half_open: u64,
    /// How long the circuit stays open before probing in half-open state.
    pub wait_duration_in_open_state: Duration,
    /// Number of buckets in the sliding metrics window.
    pub metrics_sliding_window_bucket_quantity: usize,
    /// Duration of each bucket. A one-bucket window with zero duration is
    /// a plain counter without rotation.
    pub metrics_bucket_duration: Duration,
    /// Stop signal for the window rotator. When absent the rotator runs
    /// until process exit.
    pub stop: Option<CancellationToken>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_percent_threshold_to_open: DEFAULT_ERROR_PERCENT_THRESHOLD,
            minimum_request_to_open: DEFAULT_MINIMUM_REQUEST_TO_OPEN,
            successful_required_on_half_open: DEFAULT_SUCCESSFUL_REQUIRED,
            wait_duration_in_open_state: DEFAULT_WAIT_IN_OPEN,
            metrics_sliding_window_bucket_quantity: DEFAULT_BUCKET_QUANTITY,
            metrics_bucket_duration: DEFAULT_BUCKET_DURATION,
            stop: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    fn sanitized(mut self) -> Self {
        if self.error_percent_threshold_to_open == 0 {
            self.error_percent_threshold_to_open = DEFAULT_ERROR_PERCENT_THRESHOLD;
        }
        if self.minimum_request_to_open == 0 {
            self.minimum_request_to_open = DEFAULT_MINIMUM_REQUEST_TO_OPEN;
        }
        if self.successful_required_on_half_open == 0 {
            self.successful_required_on_half_open = DEFAULT_SUCCESSFUL_REQUIRED;
        }
        if self.wait_duration_in_open_state.is_zero() {
            self.wait_duration_in_open_state = DEFAULT_WAIT_IN_OPEN;
        }
        if self.metrics_sliding_window_bucket_quantity == 0 {
            self.metrics_sliding_window_bucket_quantity = DEFAULT_BUCKET_QUANTITY;
        }
        if self.metrics_bucket_duration.is_zero()
            && self.metrics_sliding_window_bucket_quantity > 1
        {
            self.metrics_bucket_duration = DEFAULT_BUCKET_DURATION;
        }
        self
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn error_percent_threshold_to_open(mut self, percent: u32) -> Self {
        self.config.error_percent_threshold_to_open = percent;
        self
    }

    pub fn minimum_request_to_open(mut self, minimum: u64) -> Self {
        self.config.minimum_request_to_open = minimum;
        self
    }

    pub fn successful_required_on_half_open(mut self, required: u64) -> Self {
        self.config.successful_required_on_half_open = required;
        self
    }

    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.config.wait_duration_in_open_state = wait;
        self
    }

    pub fn sliding_window(mut self, bucket_quantity: usize, bucket_duration: Duration) -> Self {
        self.config.metrics_sliding_window_bucket_quantity = bucket_quantity;
        self.config.metrics_bucket_duration = bucket_duration;
        self
    }

    pub fn stop(mut self, stop: CancellationToken) -> Self {
        self.config.stop = Some(stop);
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        if self.config.error_percent_threshold_to_open > 100 {
            return Err(ConfigError::invalid(
                "error_percent_threshold_to_open must be between 0 and 100",
            ));
        }
        Ok(self.config)
    }
}

//==============================================================================
// State machine
//==============================================================================

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Executions are delegated and recorded.
    Closed,
    /// Executions are rejected without delegating.
    Open,
    /// Executions are delegated while probing for recovery.
    HalfOpen,
}

impl CircuitState {
    /// Stable identifier reported to the telemetry sink.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "halfopen",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct StateCell {
    state: CircuitState,
    entered_at: Instant,
}

/// Runner that refuses executions based on recent error statistics.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    cell: Mutex<StateCell>,
    window: BucketWindow,
    clock: C,
    inner: Arc<dyn Runner>,
}

impl CircuitBreaker<SystemClock> {
    /// Create a circuit breaker delegating to the identity runner.
    ///
    /// Must be called within a Tokio runtime: the sliding window spawns
    /// its rotator task at construction.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_inner(config, sanitize(None))
    }

    /// Create a circuit breaker delegating to `inner`.
    pub fn with_inner(config: CircuitBreakerConfig, inner: Arc<dyn Runner>) -> Self {
        Self::with_clock(config, SystemClock, inner)
    }

    /// Create a circuit breaker middleware for chain composition.
    pub fn middleware(config: CircuitBreakerConfig) -> Middleware {
        Box::new(move |inner| Arc::new(CircuitBreaker::with_inner(config.clone(), inner)))
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a circuit breaker with a custom clock (useful for testing
    /// the state timing without real delays).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C, inner: Arc<dyn Runner>) -> Self {
        let config = config.sanitized();
        let stop = config.stop.clone().unwrap_or_default();
        let window = BucketWindow::new(
            config.metrics_sliding_window_bucket_quantity,
            config.metrics_bucket_duration,
            stop,
        );
        Self {
            cell: Mutex::new(StateCell { state: CircuitState::Closed, entered_at: clock.now() }),
            window,
            clock,
            config,
            inner,
        }
    }

    /// Current state of the circuit.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    fn since_state_entered(&self) -> Duration {
        let cell = self.lock();
        self.clock.now().saturating_duration_since(cell.entered_at)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateCell> {
        self.cell.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// State decisions made before executing; this is where time-based
    /// transitions happen, lazily, on the next incoming call.
    fn pre_decide_state(&self, recorder: &Arc<dyn Recorder>) {
        if self.state() == CircuitState::Open
            && self.since_state_entered() > self.config.wait_duration_in_open_state
        {
            self.move_state(CircuitState::HalfOpen, recorder);
        }
    }

    /// State decisions made after executing; this is where count-based
    /// transitions happen.
    fn post_decide_state(&self, recorder: &Arc<dyn Recorder>) {
        match self.state() {
            CircuitState::HalfOpen => {
                // Not enough probes yet, keep waiting.
                if self.window.total_requests() < self.config.successful_required_on_half_open {
                    return;
                }
                let next = if self.window.error_rate() <= 0.0 {
                    CircuitState::Closed
                } else {
                    CircuitState::Open
                };
                self.move_state(next, recorder);
            }
            CircuitState::Closed => {
                if self.window.total_requests() >= self.config.minimum_request_to_open
                    && self.window.error_rate()
                        >= self.config.minimum_request_to_open as f64 / 100.0
                {
                    self.move_state(CircuitState::Open, recorder);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn move_state(&self, next: CircuitState, recorder: &Arc<dyn Recorder>) {
        let mut cell = self.lock();
        if cell.state == next {
            return;
        }

        recorder.inc_circuitbreaker_state(next.as_str());
        match next {
            CircuitState::Open => warn!(from = %cell.state, "circuit opened"),
            _ => info!(from = %cell.state, to = %next, "circuit state changed"),
        }

        cell.state = next;
        cell.entered_at = self.clock.now();
        self.window.reset();
    }

    async fn execute(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        // Always execute unless the circuit is open.
        match self.state() {
            CircuitState::Open => Err(Error::CircuitOpen),
            _ => self.inner.run(ctx, op).await,
        }
    }
}

#[async_trait]
impl<C: Clock> Runner for CircuitBreaker<C> {
    #[instrument(skip(self, ctx, op), fields(state = %self.state()))]
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        self.pre_decide_state(ctx.recorder());
        let result = self.execute(ctx.clone(), op).await;
        self.window.inc(result.is_err());
        self.post_decide_state(ctx.recorder());

        result
    }
}
