//! Token-bucket rate limiting for polite crawling.
//!
//! One bucket per logical domain. The bucket allows bursts up to its
//! capacity, then enforces the steady refill rate. The acquire path is
//! serialized behind a per-bucket mutex so the refill read-modify-write is
//! atomic; a caller that finds the bucket empty sleeps while holding its
//! turn, which keeps waiters ordered.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BucketState {
    rate: f64,
    max_tokens: f64,
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(rate: f64, max_tokens: f64) -> Self {
        Self {
            inner: Mutex::new(BucketState {
                rate,
                max_tokens,
                tokens: max_tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Bucket sized for a requests-per-second target: burst capacity of
    /// three seconds of traffic, capped at 10.
    pub fn for_rps(rate: f64) -> Self {
        Self::new(rate, (rate * 3.0).min(10.0))
    }

    /// Take one token, sleeping for the shortfall when the bucket is empty.
    pub async fn acquire(&self) {
        let mut state = self.inner.lock().await;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * state.rate).min(state.max_tokens);
        state.last_refill = now;

        if state.tokens < 1.0 {
            let wait = (1.0 - state.tokens) / state.rate;
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            state.tokens = 0.0;
        } else {
            state.tokens -= 1.0;
        }
    }

    /// Override the refill rate at runtime, e.g. from a robots.txt
    /// `Crawl-delay` directive (`rate = 1 / delay_seconds`).
    pub async fn set_rate(&self, rate: f64) {
        if rate <= 0.0 {
            return;
        }
        let mut state = self.inner.lock().await;
        state.rate = rate;
    }

    #[cfg(test)]
    async fn tokens(&self) -> f64 {
        self.inner.lock().await.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_up_to_capacity_without_sleeping() {
        let limiter = RateLimiter::new(100.0, 10.0);
        let start = Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        // No virtual time consumed by the burst.
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(100.0, 10.0);
        for _ in 0..10 {
            limiter.acquire().await;
        }
        let before = Instant::now();
        limiter.acquire().await;
        // One token at 100 tokens/sec takes 10ms to accumulate.
        let waited = before.elapsed();
        assert!(waited >= Duration::from_millis(9), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(12), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_decrease_on_acquire() {
        let limiter = RateLimiter::new(100.0, 5.0);
        let initial = limiter.tokens().await;
        limiter.acquire().await;
        assert!(limiter.tokens().await < initial);
    }

    #[tokio::test(start_paused = true)]
    async fn crawl_delay_override_slows_refill() {
        let limiter = RateLimiter::new(100.0, 1.0);
        limiter.acquire().await;
        // 2-second crawl delay means 0.5 tokens/sec.
        limiter.set_rate(1.0 / 2.0).await;
        let before = Instant::now();
        limiter.acquire().await;
        assert!(before.elapsed() >= Duration::from_millis(1900));
    }
}
