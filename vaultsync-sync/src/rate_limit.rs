//! Token-bucket rate limiter shared by all concurrent upstream calls.
//!
//! A caller that finds the bucket empty reserves the next token under the
//! lock (the count goes negative) and then sleeps outside it, so concurrent
//! waiters queue into distinct slots instead of racing for the same refill.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use vaultsync_core::config::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate` tokens per second, at most `burst` stored. Starts full.
    pub fn new(rate: f64, burst: u32) -> Self {
        let rate = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            1.0
        };
        let burst = f64::from(burst.max(1));
        Self {
            rate,
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn from_config(c: &RateLimitConfig) -> Self {
        Self::new(c.requests_per_second, c.burst)
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.burst as u32
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached; waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// [`acquire`](Self::acquire) for worker threads outside the async runtime.
    pub fn acquire_blocking(&self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    /// Take a token only if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long an `acquire` issued now would wait. Does not consume.
    pub fn get_wait_time(&self) -> Duration {
        let bucket = self.lock();
        let tokens = self.projected(&bucket, Instant::now());
        if tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - tokens) / self.rate)
        }
    }

    /// Tokens currently stored; negative while waiters hold reservations.
    pub fn available_tokens(&self) -> f64 {
        let bucket = self.lock();
        self.projected(&bucket, Instant::now())
    }

    fn reserve(&self) -> Duration {
        let mut bucket = self.lock();
        self.refill(&mut bucket, Instant::now());
        let wait = if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
        };
        bucket.tokens -= 1.0;
        wait
    }

    fn projected(&self, bucket: &Bucket, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        (bucket.tokens + elapsed * self.rate).min(self.burst)
    }

    fn refill(&self, bucket: &mut Bucket, now: Instant) {
        bucket.tokens = self.projected(bucket, now);
        bucket.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_is_immediate_then_fourth_waits_a_third_of_a_second() {
        let limiter = RateLimiter::new(3.0, 3);
        let started = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(started.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(333), "waited {waited:?}");
        assert!(waited < Duration::from_millis(400), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn wait_time_is_a_pure_query() {
        let limiter = RateLimiter::new(2.0, 1);
        assert_eq!(limiter.get_wait_time(), Duration::ZERO);
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        let wait = limiter.get_wait_time();
        assert_eq!(wait, Duration::from_millis(500));
        assert_eq!(limiter.get_wait_time(), wait);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(limiter.get_wait_time(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn refill_is_capped_at_burst() {
        let limiter = RateLimiter::new(10.0, 2);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.available_tokens(), 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_waiters_get_distinct_slots() {
        let limiter = Arc::new(RateLimiter::new(4.0, 1));
        let started = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                started.elapsed()
            }));
        }
        let mut times = Vec::new();
        for h in handles {
            times.push(h.await.unwrap());
        }
        times.sort();
        // One immediate token, then one every 250ms.
        assert_eq!(times[0], Duration::ZERO);
        assert!(times[4] >= Duration::from_secs(1));
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(249));
        }
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn any_one_second_window_stays_within_burst() {
        let limiter = RateLimiter::new(5.0, 5);
        let started = Instant::now();
        let mut stamps = Vec::new();
        for _ in 0..20 {
            limiter.acquire().await;
            stamps.push(started.elapsed());
        }
        for (i, t) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .take_while(|s| **s < *t + Duration::from_secs(1))
                .count();
            assert!(in_window <= 10, "window at {t:?} has {in_window}");
        }
        // 20 tokens with 5 pre-filled need at least 3s at 5/s.
        assert!(stamps[19] >= Duration::from_secs(3));
    }
}
