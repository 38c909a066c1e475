//! Sliding-window rate limiter for platform calls.
//!
//! Each attempt is recorded at permit time, under the same lock that checked
//! the quota, so the recorded calls inside any rolling window never exceed
//! `max_calls` even with concurrent callers. The limiter is process-local.
//!
//! `execute` adds 429 handling on top: throttled errors retry the same call
//! with exponential backoff (via `tokio-retry2`); any other error propagates
//! immediately.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

/// Errors that say "slow down" rather than "this failed".
pub trait Throttled {
    fn is_throttled(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window: Duration,
    /// Slack added after the oldest call leaves the window
    pub buffer: Duration,
    /// Fixed pause once fewer than `cooldown_fraction` of the quota remains
    pub cooldown: Duration,
    pub cooldown_fraction: f64,
    pub max_retries: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: 200,
            window: Duration::from_secs(3600),
            buffer: Duration::from_secs(1),
            cooldown: Duration::from_secs(2),
            cooldown_fraction: 0.10,
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
        }
    }
}

impl RateLimitConfig {
    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`, capped.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31) as u32);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn backoff_schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(move |attempt| self.backoff_for(attempt))
    }

    fn cooldown_threshold(&self) -> usize {
        let reserve = (self.max_calls as f64 * self.cooldown_fraction).floor() as usize;
        self.max_calls.saturating_sub(reserve)
    }
}

pub struct RateLimiter {
    config: RateLimitConfig,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            calls: Mutex::new(VecDeque::with_capacity(config.max_calls)),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until a call is allowed, then record it.
    pub async fn acquire(&self) {
        let mut cooled_down = false;

        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|oldest| *oldest + self.config.window <= now)
                {
                    calls.pop_front();
                }

                if calls.len() >= self.config.max_calls {
                    match calls.front() {
                        Some(oldest) => {
                            (*oldest + self.config.window + self.config.buffer)
                                .saturating_duration_since(now)
                        }
                        // Zero quota: nothing will ever leave the window.
                        None => self.config.window,
                    }
                } else if !cooled_down && calls.len() >= self.config.cooldown_threshold() {
                    cooled_down = true;
                    debug!(
                        recorded = calls.len(),
                        max_calls = self.config.max_calls,
                        "Near rate limit, cooling down"
                    );
                    self.config.cooldown
                } else {
                    calls.push_back(now);
                    return;
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Calls recorded inside the current window.
    pub async fn recorded_calls(&self) -> usize {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        calls
            .iter()
            .filter(|at| **at + self.config.window > now)
            .count()
    }

    /// Run `operation` under the quota, retrying throttled failures with backoff.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Throttled + std::fmt::Display,
    {
        let mut attempt = 0usize;

        Retry::spawn(self.config.backoff_schedule(), || {
            attempt += 1;
            let current = attempt;
            let call = operation();
            async move {
                self.acquire().await;
                match call.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_throttled() => {
                        warn!(attempt = current, error = %e, "Throttled by platform, backing off");
                        Err(RetryError::Transient {
                            err: e,
                            retry_after: None,
                        })
                    }
                    Err(e) => Err(RetryError::Permanent(e)),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    struct FakeError {
        throttled: bool,
    }

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake (throttled: {})", self.throttled)
        }
    }

    impl Throttled for FakeError {
        fn is_throttled(&self) -> bool {
            self.throttled
        }
    }

    fn config(max_calls: usize, window_secs: u64) -> RateLimitConfig {
        RateLimitConfig {
            max_calls,
            window: Duration::from_secs(window_secs),
            ..Default::default()
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RateLimitConfig::default();
        let delays: Vec<u64> = (0..6).map(|a| config.backoff_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 16]);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_oldest_call_to_leave_window() {
        let limiter = RateLimiter::new(RateLimitConfig {
            cooldown_fraction: 0.0,
            ..config(3, 60)
        });
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn cools_down_near_the_quota() {
        let limiter = RateLimiter::new(config(10, 3600));
        let start = Instant::now();

        // Threshold is 9 recorded calls; only the 10th pays the cooldown.
        for _ in 0..9 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(limiter.recorded_calls().await, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_exceed_quota_in_any_window() {
        let window = Duration::from_secs(10);
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            cooldown_fraction: 0.0,
            buffer: Duration::ZERO,
            ..config(4, 10)
        }));
        let stamps = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..13 {
            let limiter = limiter.clone();
            let stamps = stamps.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                stamps.lock().unwrap().push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut stamps = stamps.lock().unwrap().clone();
        stamps.sort();
        assert_eq!(stamps.len(), 13);
        for (i, start) in stamps.iter().enumerate() {
            let in_window = stamps[i..].iter().filter(|t| **t < *start + window).count();
            assert!(in_window <= 4, "{in_window} calls inside one window");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_calls_back_off_1_2_4_8_16() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_retries: 5,
            ..config(200, 3600)
        });
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<&str, FakeError> = limiter
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 5 {
                        Err(FakeError { throttled: true })
                    } else {
                        Ok("posted")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "posted");
        assert_eq!(calls.load(Ordering::SeqCst), 6);
        assert_eq!(start.elapsed(), Duration::from_secs(1 + 2 + 4 + 8 + 16));
        assert_eq!(limiter.recorded_calls().await, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let limiter = RateLimiter::new(config(200, 3600));
        let calls = AtomicUsize::new(0);

        let result: Result<(), FakeError> = limiter
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError { throttled: true }) }
            })
            .await;

        assert!(result.unwrap_err().throttled);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_propagate_immediately() {
        let limiter = RateLimiter::new(config(200, 3600));
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let result: Result<(), FakeError> = limiter
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError { throttled: false }) }
            })
            .await;

        assert!(!result.unwrap_err().throttled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
