//! Tick rate limiting.
//!
//! A simple in-memory sliding window. One shared instance caps ticks across
//! all connections; each WebSocket connection additionally carries its own
//! instance with a lower budget.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after: Duration,
}

#[derive(Debug)]
struct WindowState {
    count: u32,
    window_start: Instant,
}

/// Sliding-window limiter: at most `max_per_window` acquisitions per window.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window: max_per_window.max(1),
            window,
            state: Mutex::new(WindowState {
                count: 0,
                window_start: Instant::now(),
            }),
        }
    }

    /// Limiter for N ticks per second.
    pub fn per_second(max: u32) -> Self {
        Self::new(max, Duration::from_secs(1))
    }

    pub fn try_acquire(&self) -> Result<(), RateLimitError> {
        let mut state = self.state.lock();
        let now = Instant::now();

        if now.duration_since(state.window_start) >= self.window {
            state.count = 0;
            state.window_start = now;
        }

        if state.count >= self.max_per_window {
            let reset_at = state.window_start + self.window;
            return Err(RateLimitError {
                retry_after: reset_at.saturating_duration_since(now),
            });
        }

        state.count += 1;
        Ok(())
    }
}
