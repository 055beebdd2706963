//! Sliding-window request and token limiter shared by all workers of a run

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const WINDOW: Duration = Duration::from_secs(60);
const TOKEN_POLL: Duration = Duration::from_millis(100);

/// Caps requests and tokens per window. Token usage is only known after a
/// response arrives, so token pressure delays the next request rather than
/// the one that caused it.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_window: u32,
    tokens_per_window: u32,
    window: Duration,
    requests: Mutex<VecDeque<Instant>>,
    tokens: Mutex<VecDeque<(Instant, u32)>>,
}

impl RateLimiter {
    /// Per-minute limits
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, tokens_per_minute, WINDOW)
    }

    pub fn with_window(requests: u32, tokens: u32, window: Duration) -> Self {
        Self {
            requests_per_window: requests.max(1),
            tokens_per_window: tokens,
            window,
            requests: Mutex::new(VecDeque::new()),
            tokens: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until both a request slot and token headroom are available,
    /// then claim the slot.
    pub async fn acquire(&self) {
        while !self.has_token_capacity().await {
            tokio::time::sleep(TOKEN_POLL).await;
        }

        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                prune(&mut requests, now, self.window, |t| *t);
                if requests.len() < self.requests_per_window as usize {
                    requests.push_back(now);
                    return;
                }
                requests
                    .front()
                    .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
                    .unwrap_or_default()
            };
            tracing::debug!("Request limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait + Duration::from_millis(10)).await;
        }
    }

    /// Record tokens consumed by a finished request
    pub async fn record_tokens(&self, tokens: u32) {
        if tokens == 0 {
            return;
        }
        let mut usage = self.tokens.lock().await;
        let now = Instant::now();
        prune(&mut usage, now, self.window, |(t, _)| *t);
        usage.push_back((now, tokens));
    }

    /// Tokens recorded within the current window
    pub async fn current_token_usage(&self) -> u64 {
        let mut usage = self.tokens.lock().await;
        prune(&mut usage, Instant::now(), self.window, |(t, _)| *t);
        usage.iter().map(|(_, n)| u64::from(*n)).sum()
    }

    async fn has_token_capacity(&self) -> bool {
        self.tokens_per_window == 0
            || self.current_token_usage().await < u64::from(self.tokens_per_window)
    }
}

fn prune<T>(entries: &mut VecDeque<T>, now: Instant, window: Duration, at: impl Fn(&T) -> Instant) {
    while let Some(front) = entries.front() {
        if now.duration_since(at(front)) >= window {
            entries.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_within_limit_do_not_wait() {
        let limiter = RateLimiter::new(5, 1000);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_request_over_limit_waits_for_window() {
        let limiter = RateLimiter::with_window(2, 0, Duration::from_millis(80));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() >= Duration::from_millis(70));
    }

    #[tokio::test]
    async fn test_token_usage_expires() {
        let limiter = RateLimiter::with_window(60, 1000, Duration::from_millis(50));
        limiter.record_tokens(100).await;
        limiter.record_tokens(200).await;
        assert_eq!(limiter.current_token_usage().await, 300);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(limiter.current_token_usage().await, 0);
    }
}
