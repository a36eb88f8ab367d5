//! Process-wide request rate limiter.
//!
//! One shared limiter serves every outbound venue call, so the aggregate
//! request rate (not each worker's individual rate) respects the venue's
//! documented limit. Sliding-window bookkeeping over request timestamps;
//! waiters are bounded, never queued indefinitely.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::ExchangeError;

/// Sliding-window rate limiter.
pub struct RateLimiter {
    max_per_window: usize,
    window: Duration,
    /// Longest a blocked `acquire` may wait before failing
    max_wait: Duration,
    state: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limit to `max_per_window` requests per `window`.
    ///
    /// Blocked callers wait at most two windows before failing with
    /// `RateLimitExceeded`.
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            max_wait: window * 2,
            state: Mutex::new(VecDeque::new()),
        }
    }

    /// Override the maximum wait for blocked callers.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Take a slot, waiting (bounded) for one to free up.
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` if no slot frees within the wait bound.
    pub async fn acquire(&self) -> Result<(), ExchangeError> {
        let deadline = Instant::now() + self.max_wait;

        loop {
            let now = Instant::now();
            let mut window = self.state.lock().await;
            Self::expire(&mut window, now, self.window);

            if window.len() < self.max_per_window {
                window.push_back(now);
                return Ok(());
            }

            let wait = window
                .front()
                .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                .unwrap_or_default();
            drop(window);

            if now + wait > deadline {
                return Err(ExchangeError::RateLimitExceeded);
            }
            tokio::time::sleep(wait).await;
        }
    }

    /// Take a slot only if one is free right now.
    ///
    /// # Errors
    ///
    /// `RateLimitExceeded` if the window is full.
    pub async fn try_acquire(&self) -> Result<(), ExchangeError> {
        let now = Instant::now();
        let mut window = self.state.lock().await;
        Self::expire(&mut window, now, self.window);

        if window.len() < self.max_per_window {
            window.push_back(now);
            Ok(())
        } else {
            Err(ExchangeError::RateLimitExceeded)
        }
    }

    fn expire(window: &mut VecDeque<Instant>, now: Instant, width: Duration) {
        while let Some(oldest) = window.front().copied() {
            if now.duration_since(oldest) >= width {
                window.pop_front();
            } else {
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_try_acquire_caps_burst() {
        let limiter = RateLimiter::new(10, Duration::from_secs(1));

        let mut granted = 0;
        let mut rejected = 0;
        for _ in 0..100 {
            match limiter.try_acquire().await {
                Ok(()) => granted += 1,
                Err(ExchangeError::RateLimitExceeded) => rejected += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(rejected, 90);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_window() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));

        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await.unwrap();
        }

        // Third and fourth acquires had to wait for the first window to pass
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_acquire_fails_past_wait_bound() {
        let limiter =
            RateLimiter::new(1, Duration::from_secs(60)).with_max_wait(Duration::from_millis(10));

        limiter.acquire().await.unwrap();

        let result = limiter.acquire().await;
        assert!(matches!(result, Err(ExchangeError::RateLimitExceeded)));
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = RateLimiter::new(1, Duration::from_millis(20));

        limiter.try_acquire().await.unwrap();
        assert!(limiter.try_acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(limiter.try_acquire().await.is_ok());
    }
}
