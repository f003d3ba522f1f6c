//! Chaos runner injecting latency and synthetic failures.
//!
//! The [`Injector`] handle controls the faults and can be retuned while
//! the chain is running. Error injection compares the observed error
//! fraction against the target percentage and fails the call when the
//! observed fraction is below it, which makes the measured rate converge
//! to the target from below. The counters are process-local and never
//! reset; a small drift around the target between the pre-decision read
//! and the post-execution update is expected.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::context::Context;
use crate::errors::{ConfigError, Error};
use crate::runner::{sanitize, Middleware, Operation, Runner};

const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

/// Controls the faults injected by the chaos runner.
#[derive(Debug)]
pub struct Injector {
    state: Mutex<InjectorState>,
}

#[derive(Debug, Clone, Copy)]
struct InjectorState {
    latency: Duration,
    error_percent: u8,
}

impl Injector {
    /// Create an injector with no faults configured.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    fn with_latency(latency: Duration) -> Self {
        Self { state: Mutex::new(InjectorState { latency, error_percent: 0 }) }
    }

    /// Set the latency injected before every execution.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Set the target percentage of executions that fail with
    /// [`Error::FailureInjected`]. Valid range is 0 to 100.
    pub fn set_error_percent(&self, percent: u8) -> Result<(), ConfigError> {
        if percent > 100 {
            return Err(ConfigError::invalid(format!("{percent} is not a valid percent")));
        }
        self.lock().error_percent = percent;
        Ok(())
    }

    fn snapshot(&self) -> InjectorState {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InjectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the chaos runner.
#[derive(Debug, Clone, Default)]
pub struct ChaosConfig {
    /// Fault injector shared with the caller. When absent a private
    /// injector with a 100 ms latency attack is used.
    pub injector: Option<Arc<Injector>>,
}

#[derive(Debug, Default)]
struct FailureCounters {
    total: u64,
    errors: u64,
}

/// Runner that injects latency and synthetic failures before delegating.
pub struct Chaos {
    injector: Arc<Injector>,
    counters: Mutex<FailureCounters>,
    inner: Arc<dyn Runner>,
}

impl Chaos {
    /// Create a chaos runner delegating to the identity runner.
    pub fn new(config: ChaosConfig) -> Self {
        Self::with_inner(config, sanitize(None))
    }

    /// Create a chaos runner delegating to `inner`.
    pub fn with_inner(config: ChaosConfig, inner: Arc<dyn Runner>) -> Self {
        let injector =
            config.injector.unwrap_or_else(|| Arc::new(Injector::with_latency(DEFAULT_LATENCY)));
        Self { injector, counters: Mutex::new(FailureCounters::default()), inner }
    }

    /// Create a chaos middleware for chain composition.
    pub fn middleware(config: ChaosConfig) -> Middleware {
        let injector =
            config.injector.unwrap_or_else(|| Arc::new(Injector::with_latency(DEFAULT_LATENCY)));
        Box::new(move |inner| {
            Arc::new(Chaos::with_inner(
                ChaosConfig { injector: Some(Arc::clone(&injector)) },
                inner,
            ))
        })
    }

    /// Observed error percentage so far. Stale reads are fine; the
    /// counters converge over time.
    fn observed_error_percent(&self) -> f64 {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if counters.total == 0 {
            return 0.0;
        }
        counters.errors as f64 / counters.total as f64 * 100.0
    }

    fn account(&self, failed: bool) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        counters.total += 1;
        if failed {
            counters.errors += 1;
        }
    }
}

#[async_trait]
impl Runner for Chaos {
    async fn run(&self, ctx: Context, op: Operation) -> Result<(), Error> {
        ctx.ensure_active()?;

        let faults = self.injector.snapshot();

        // Latency attack.
        if !faults.latency.is_zero() {
            debug!(latency = ?faults.latency, "injecting latency");
            ctx.recorder().inc_chaos_injected_failure("latency");
            tokio::time::sleep(faults.latency).await;
        }

        // Error attack: fail while the observed rate is below the target.
        let result = if self.observed_error_percent() < f64::from(faults.error_percent) {
            ctx.recorder().inc_chaos_injected_failure("error");
            Err(Error::FailureInjected)
        } else {
            self.inner.run(ctx, op).await
        };

        self.account(result.is_err());
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use crate::operation;

    use super::*;

    fn chaos_with(latency: Duration, error_percent: u8) -> Chaos {
        let injector = Arc::new(Injector::new());
        injector.set_latency(latency);
        injector.set_error_percent(error_percent).unwrap();
        Chaos::new(ChaosConfig { injector: Some(injector) })
    }

    #[tokio::test]
    async fn test_no_faults_delegates() {
        let chaos = chaos_with(Duration::ZERO, 0);
        let result = chaos.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_latency_injection_delays_execution() {
        let chaos = chaos_with(Duration::from_millis(30), 0);
        let start = Instant::now();
        chaos.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_full_error_percent_always_injects() {
        let chaos = chaos_with(Duration::ZERO, 100);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..10 {
            let calls_in_op = Arc::clone(&calls);
            let result = chaos
                .run(
                    Context::new(),
                    operation(move |_ctx| {
                        let calls = Arc::clone(&calls_in_op);
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .await;
            assert_eq!(result, Err(Error::FailureInjected));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_rate_converges_to_target_from_below() {
        let chaos = chaos_with(Duration::ZERO, 50);
        let mut injected = 0;

        for _ in 0..40 {
            let result = chaos.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await;
            if result == Err(Error::FailureInjected) {
                injected += 1;
            }
        }

        // The observed rate chases 50% from below.
        assert!((15..=20).contains(&injected), "injected {injected} of 40");
    }

    #[tokio::test]
    async fn test_injected_fault_kinds_are_recorded() {
        let recorder = Arc::new(crate::testing::CapturingRecorder::default());
        let injector = Arc::new(Injector::new());
        injector.set_latency(Duration::from_millis(1));
        injector.set_error_percent(100).unwrap();

        let runner = crate::metrics::measured(
            "chaos-test",
            Arc::clone(&recorder) as Arc<dyn crate::metrics::Recorder>,
            Some(Arc::new(Chaos::new(ChaosConfig { injector: Some(injector) }))),
        );

        let result = runner.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await;
        assert_eq!(result, Err(Error::FailureInjected));

        let kinds = recorder.chaos_kinds.lock().unwrap().clone();
        assert_eq!(kinds, vec!["latency".to_string(), "error".to_string()]);
    }

    #[test]
    fn test_error_percent_validation() {
        let injector = Injector::new();
        assert!(injector.set_error_percent(100).is_ok());
        assert!(injector.set_error_percent(101).is_err());
    }

    #[tokio::test]
    async fn test_injector_can_be_retuned_live() {
        let injector = Arc::new(Injector::new());
        let chaos = Chaos::new(ChaosConfig { injector: Some(Arc::clone(&injector)) });

        let result = chaos.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await;
        assert!(result.is_ok());

        injector.set_error_percent(100).unwrap();
        let result = chaos.run(Context::new(), operation(|_ctx| async move { Ok(()) })).await;
        assert_eq!(result, Err(Error::FailureInjected));
    }
}
