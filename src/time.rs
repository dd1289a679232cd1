use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Time source for read tasks and workers. Production code runs on
/// [`SystemClock`]; tests substitute [`ManualClock`] so wait expirations can
/// be asserted exactly.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic milliseconds since an arbitrary origin.
    fn now_ms(&self) -> u64;

    async fn sleep_ms(&self, duration_ms: u64);
}

/// Monotonic clock anchored at construction time.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    async fn sleep_ms(&self, duration_ms: u64) {
        tokio::time::sleep(Duration::from_millis(duration_ms)).await;
    }
}

/// Virtual clock for deterministic tests. Sleeping advances the readable time
/// by the full duration and yields, so a single driving task observes exactly
/// the waits it requested.
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now_ms: AtomicU64::new(0),
        }
    }

    pub fn advance_ms(&self, duration_ms: u64) {
        self.now_ms.fetch_add(duration_ms, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, duration_ms: u64) {
        self.now_ms.fetch_add(duration_ms, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}
