//! Sliding-window request rate limiter.
//!
//! Keeps the timestamps of the last N requests within a trailing 60-second
//! window. Before each new request, [`RateLimiter::acquire`] blocks until
//! fewer than N remain in the window, then records the new timestamp. There
//! is no token refill — emptier windows simply permit immediate issue.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Length of the trailing window.
const WINDOW: Duration = Duration::from_secs(60);

/// Per-source sliding-window rate limiter.
///
/// Safe to share across tasks; each connector instance carries its own.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: usize,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter permitting `max_requests_per_minute` requests in
    /// any trailing 60-second window. A zero budget is treated as 1.
    #[must_use]
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_per_window: max_requests_per_minute.max(1) as usize,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Waits until a request slot is available, then claims it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                while window.front().is_some_and(|t| t.elapsed() >= WINDOW) {
                    window.pop_front();
                }
                if window.len() < self.max_per_window {
                    window.push_back(Instant::now());
                    return;
                }
                window
                    .front()
                    .map_or(WINDOW, |t| WINDOW.saturating_sub(t.elapsed()))
            };
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn permits_budget_without_waiting() {
        let limiter = RateLimiter::new(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_until_window_frees_a_slot() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        // Third request must wait for the first to fall out of the window.
        limiter.acquire().await;
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_n_requests_in_any_window() {
        let limiter = RateLimiter::new(5);
        let mut grants: Vec<Instant> = Vec::new();
        for _ in 0..12 {
            limiter.acquire().await;
            grants.push(Instant::now());
        }
        for (i, t) in grants.iter().enumerate() {
            let in_window = grants
                .iter()
                .filter(|g| **g <= *t && t.duration_since(**g) < WINDOW)
                .count();
            assert!(in_window <= 5, "grant {i} saw {in_window} in window");
        }
    }
}
