//! Sliding bucketed window of request and error counters.
//!
//! A fixed ring of buckets, each holding `(total, errors)`. A background
//! rotator ticks every bucket duration, zeroes the oldest bucket and
//! designates it the current one, so the window only ever reflects the
//! most recent `quantity * duration` of traffic. A one-bucket window with
//! zero duration degenerates to a plain counter with no rotation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    total: u64,
    errors: u64,
}

#[derive(Debug)]
struct WindowState {
    buckets: Vec<Bucket>,
    /// Index of the bucket receiving new increments.
    current: usize,
}

impl WindowState {
    fn rotate(&mut self) {
        // The oldest bucket becomes the fresh current one.
        self.current = (self.current + 1) % self.buckets.len();
        self.buckets[self.current] = Bucket::default();
    }
}

/// Ring of counter buckets rotated by wall-clock time.
#[derive(Debug, Clone)]
pub(crate) struct BucketWindow {
    state: Arc<Mutex<WindowState>>,
}

impl BucketWindow {
    /// Create a window and, unless it degenerates to a single counter,
    /// spawn its rotator task. The rotator stops when `stop` is cancelled.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(quantity: usize, duration: Duration, stop: CancellationToken) -> Self {
        let quantity = quantity.max(1);
        let window = Self {
            state: Arc::new(Mutex::new(WindowState {
                buckets: vec![Bucket::default(); quantity],
                current: 0,
            })),
        };

        if quantity > 1 && !duration.is_zero() {
            let state = Arc::clone(&window.state);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(duration);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick of an interval completes immediately.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            state.lock().unwrap_or_else(PoisonError::into_inner).rotate();
                        }
                    }
                }
            });
        }

        window
    }

    /// Record one request in the current bucket.
    pub fn inc(&self, error: bool) {
        let mut state = self.lock();
        let current = state.current;
        let bucket = &mut state.buckets[current];
        bucket.total += 1;
        if error {
            bucket.errors += 1;
        }
    }

    /// Zero every bucket and restart the rotation phase at bucket 0.
    pub fn reset(&self) {
        let mut state = self.lock();
        for bucket in &mut state.buckets {
            *bucket = Bucket::default();
        }
        state.current = 0;
    }

    /// Total requests recorded across all buckets.
    pub fn total_requests(&self) -> u64 {
        self.lock().buckets.iter().map(|b| b.total).sum()
    }

    /// Error fraction across all buckets, 0.0 when the window is empty.
    pub fn error_rate(&self) -> f64 {
        let state = self.lock();
        let total: u64 = state.buckets.iter().map(|b| b.total).sum();
        if total == 0 {
            return 0.0;
        }
        let errors: u64 = state.buckets.iter().map(|b| b.errors).sum();
        errors as f64 / total as f64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
