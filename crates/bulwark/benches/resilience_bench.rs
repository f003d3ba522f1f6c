//! Resilience runner benchmarks.
//!
//! Covers the hot paths of the main runners: plain chain dispatch, retry
//! with and without backoff, circuit breaker bookkeeping and bulkhead
//! admission.
//!
//! Run with: `cargo bench --bench resilience_bench -p bulwark`

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Builder as RuntimeBuilder;

use bulwark::bulkhead::{Bulkhead, BulkheadConfig};
use bulwark::circuitbreaker::{CircuitBreaker, CircuitBreakerConfig};
use bulwark::retry::{Retry, RetryConfig};
use bulwark::{chain, operation, Context, Identity, Operation, Runner};

fn noop_operation() -> Operation {
    operation(|_ctx| async move { Ok(()) })
}

fn bench_identity_dispatch(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread().enable_all().build().unwrap();

    c.bench_function("identity_dispatch", |b| {
        let op = noop_operation();
        b.iter(|| {
            runtime.block_on(async {
                black_box(Identity.run(Context::new(), Arc::clone(&op)).await).unwrap();
            });
        });
    });
}

fn bench_empty_chain(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread().enable_all().build().unwrap();

    c.bench_function("empty_chain_dispatch", |b| {
        let runner = chain(Vec::new());
        let op = noop_operation();
        b.iter(|| {
            runtime.block_on(async {
                black_box(runner.run(Context::new(), Arc::clone(&op)).await).unwrap();
            });
        });
    });
}

fn bench_retry_success_path(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread().enable_all().build().unwrap();

    c.bench_function("retry_first_attempt_success", |b| {
        let retry = Retry::new(RetryConfig::default());
        let op = noop_operation();
        b.iter(|| {
            runtime.block_on(async {
                black_box(retry.run(Context::new(), Arc::clone(&op)).await).unwrap();
            });
        });
    });
}

fn bench_circuit_breaker_closed_path(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread().enable_all().build().unwrap();

    c.bench_function("circuit_breaker_closed_success", |b| {
        let breaker = runtime.block_on(async {
            CircuitBreaker::new(CircuitBreakerConfig {
                metrics_sliding_window_bucket_quantity: 1,
                metrics_bucket_duration: Duration::ZERO,
                ..Default::default()
            })
        });
        let op = noop_operation();
        b.iter(|| {
            runtime.block_on(async {
                black_box(breaker.run(Context::new(), Arc::clone(&op)).await).unwrap();
            });
        });
    });
}

fn bench_bulkhead_uncontended(c: &mut Criterion) {
    let runtime = RuntimeBuilder::new_current_thread().enable_all().build().unwrap();

    c.bench_function("bulkhead_uncontended_admission", |b| {
        let bulkhead = Bulkhead::new(BulkheadConfig::default());
        let op = noop_operation();
        b.iter(|| {
            runtime.block_on(async {
                black_box(bulkhead.run(Context::new(), Arc::clone(&op)).await).unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_identity_dispatch,
    bench_empty_chain,
    bench_retry_success_path,
    bench_circuit_breaker_closed_path,
    bench_bulkhead_uncontended,
);
criterion_main!(benches);
