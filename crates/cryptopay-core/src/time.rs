//! Clock abstraction for backoff waits and replay-key expiry.
//!
//! Retry backoff and replay TTL bookkeeping both depend on time. Routing them
//! through `Clock` keeps production on tokio's timer while tests advance a
//! virtual clock and inspect the waits that were requested.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};

/// Source of time for the SDK.
///
/// Production code uses `RealClock`; tests inject `TestClock`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current monotonic instant.
    fn now(&self) -> Instant;

    /// Returns the current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Suspends the calling task for `duration`.
    ///
    /// Only the calling task is suspended; other calls sharing the clock keep
    /// running.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Clock backed by the system and tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock for deterministic tests.
///
/// `sleep` advances virtual time instead of waiting and records the requested
/// duration, so retry schedules can be asserted exactly.
#[derive(Debug, Clone)]
pub struct TestClock {
    elapsed_ns: Arc<AtomicU64>,
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl TestClock {
    /// Creates a test clock anchored at the current time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock whose wall-clock time starts at `start`.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            base_instant: Instant::now(),
            base_utc: start,
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advances virtual time by `duration`.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(duration_ns, Ordering::AcqRel);
    }

    /// Returns the virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }

    /// Returns every duration passed to `sleep`, in call order.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.base_utc + elapsed
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.sleeps.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(duration);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
