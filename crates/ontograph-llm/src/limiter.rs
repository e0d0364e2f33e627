//! Dual fixed-window rate limiting.
//!
//! Two windows guard every outbound request: a per-second burst limit and
//! a per-minute sustained limit. A request acquires both before issuing.
//! The windows sit behind an async mutex held across the wait, so
//! acquisitions drain strictly FIFO - the goal is staying under provider
//! 429s, not modeling their exact accounting.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_per_second")]
    pub per_second: u32,
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
}

fn default_per_second() -> u32 {
    2
}

fn default_per_minute() -> u32 {
    60
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            per_second: default_per_second(),
            per_minute: default_per_minute(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cancelled while waiting for a rate-limit slot")]
pub struct AcquireCancelled;

#[derive(Debug)]
struct Window {
    limit: u32,
    span: Duration,
    count: u32,
    started: Instant,
}

impl Window {
    fn new(limit: u32, span: Duration) -> Self {
        Self {
            limit: limit.max(1),
            span,
            count: 0,
            started: Instant::now(),
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.started) >= self.span {
            self.started = now;
            self.count = 0;
        }
    }

    fn has_room(&self) -> bool {
        self.count < self.limit
    }

    fn next_free(&self) -> Instant {
        self.started + self.span
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    inner: tokio::sync::Mutex<(Window, Window)>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            inner: tokio::sync::Mutex::new((
                Window::new(limits.per_second, Duration::from_secs(1)),
                Window::new(limits.per_minute, Duration::from_secs(60)),
            )),
        }
    }

    /// Waits until both windows admit one request, then consumes a slot
    /// from each. Returns early when `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireCancelled> {
        let mut windows = self.inner.lock().await;
        loop {
            if cancel.is_cancelled() {
                return Err(AcquireCancelled);
            }
            let now = Instant::now();
            windows.0.roll(now);
            windows.1.roll(now);
            if windows.0.has_room() && windows.1.has_room() {
                windows.0.count += 1;
                windows.1.count += 1;
                return Ok(());
            }
            let mut wake = now;
            if !windows.0.has_room() {
                wake = wake.max(windows.0.next_free());
            }
            if !windows.1.has_room() {
                wake = wake.max(windows.1.next_free());
            }
            tokio::select! {
                () = cancel.cancelled() => return Err(AcquireCancelled),
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
