//! Token-bucket pacing for worker write loops.

use std::time::{Duration, Instant};

const MICROS_PER_SECOND: u128 = 1_000_000;
const MINIMUM_SLEEP_MICROS: u128 = 100_000;
const MIN_CHUNK: usize = 512;

#[cfg(any(test, feature = "test-support"))]
mod recorder {
    use std::sync::Mutex;
    use std::time::Duration;

    static SLEEPS: Mutex<Vec<Duration>> = Mutex::new(Vec::new());

    pub(super) fn record(d: Duration) {
        if let Ok(mut sleeps) = SLEEPS.lock() {
            sleeps.push(d);
        }
    }

    /// Sleeps the limiter asked for since the last reset.
    pub fn recorded_sleeps() -> Vec<Duration> {
        SLEEPS.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Clears the recording between tests.
    pub fn reset_recorded_sleeps() {
        if let Ok(mut sleeps) = SLEEPS.lock() {
            sleeps.clear();
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use recorder::{recorded_sleeps, reset_recorded_sleeps};

fn sleep_for(duration: Duration) {
    #[cfg(any(test, feature = "test-support"))]
    {
        recorder::record(duration);
    }
    #[cfg(not(any(test, feature = "test-support")))]
    {
        std::thread::sleep(duration);
    }
}

/// Paces a write loop to a byte-per-second budget.
///
/// The worker asks for a [`RateLimiter::recommended_chunk`], writes that
/// much, then calls [`RateLimiter::register`]; the limiter tracks the byte
/// debt against wall time and sleeps once the debt is worth at least the
/// minimum sleep window.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    limit: u64,
    chunk: usize,
    debt: u128,
    last: Option<Instant>,
}

impl RateLimiter {
    /// A limiter for `limit` bytes per second (must be non-zero).
    #[must_use]
    pub fn new(limit: u64) -> Self {
        Self {
            limit: limit.max(1),
            chunk: chunk_for(limit),
            debt: 0,
            last: None,
        }
    }

    /// Applies a recomputed share without losing pacing state.
    pub fn update_limit(&mut self, limit: u64) {
        self.limit = limit.max(1);
        self.chunk = chunk_for(limit);
        self.debt = 0;
        self.last = None;
    }

    /// Configured budget in bytes per second.
    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Largest write the limiter schedules before sleeping.
    #[must_use]
    pub fn recommended_chunk(&self, buffer_len: usize) -> usize {
        buffer_len.min(self.chunk.max(1))
    }

    /// Records a completed write; sleeps when the accumulated debt says so.
    pub fn register(&mut self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let now = Instant::now();
        self.debt = self.debt.saturating_add(bytes as u128);

        if let Some(previous) = self.last {
            let elapsed_us = now.duration_since(previous).as_micros();
            let allowed = elapsed_us.saturating_mul(u128::from(self.limit)) / MICROS_PER_SECOND;
            self.debt = self.debt.saturating_sub(allowed);
        }
        self.last = Some(now);

        let sleep_us = self.debt.saturating_mul(MICROS_PER_SECOND) / u128::from(self.limit);
        if sleep_us < MINIMUM_SLEEP_MICROS {
            return;
        }
        sleep_for(Duration::from_micros(sleep_us.min(u128::from(u64::MAX)) as u64));
        self.debt = 0;
        self.last = Some(Instant::now());
    }
}

fn chunk_for(limit: u64) -> usize {
    let kib = (limit / 1024).max(1);
    usize::try_from(kib.saturating_mul(128))
        .unwrap_or(usize::MAX)
        .max(MIN_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_scales_with_limit() {
        assert_eq!(RateLimiter::new(100).recommended_chunk(1 << 20), MIN_CHUNK);
        assert_eq!(
            RateLimiter::new(100 * 1024).recommended_chunk(1 << 20),
            100 * 128
        );
    }

    #[test]
    fn chunk_never_exceeds_buffer() {
        let limiter = RateLimiter::new(100 * 1024);
        assert_eq!(limiter.recommended_chunk(64), 64);
        assert_eq!(limiter.recommended_chunk(0), 0);
    }

    #[test]
    fn zero_byte_register_is_noop() {
        reset_recorded_sleeps();
        let mut limiter = RateLimiter::new(1);
        limiter.register(0);
        assert!(recorded_sleeps().is_empty());
    }

    #[test]
    fn small_debt_does_not_sleep() {
        reset_recorded_sleeps();
        let mut limiter = RateLimiter::new(10_000_000);
        limiter.register(10);
        assert!(recorded_sleeps().is_empty());
    }

    #[test]
    fn large_debt_requests_a_proportional_sleep() {
        reset_recorded_sleeps();
        let mut limiter = RateLimiter::new(1_000);
        // One second worth of bytes must sleep roughly one second.
        limiter.register(1_000);
        let sleeps = recorded_sleeps();
        assert_eq!(sleeps.len(), 1);
        assert!(sleeps[0] >= Duration::from_millis(900), "{sleeps:?}");
    }

    #[test]
    fn update_limit_resets_pacing_state() {
        reset_recorded_sleeps();
        let mut limiter = RateLimiter::new(1_000);
        limiter.register(500);
        limiter.update_limit(2_000);
        assert_eq!(limiter.limit(), 2_000);
        // Debt was cleared, so a tiny write must not sleep.
        limiter.register(1);
        let sleeps = recorded_sleeps();
        assert!(sleeps.iter().all(|d| *d < Duration::from_secs(1)));
    }

    #[test]
    fn limit_is_never_zero() {
        assert_eq!(RateLimiter::new(0).limit(), 1);
    }
}
