//! Sliding-window request budget shared by every clone of a client

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Wait until a request fits in the window, then record it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut sent = self.sent.lock().await;
                let now = Instant::now();
                while let Some(oldest) = sent.front() {
                    if now.duration_since(*oldest) >= self.window {
                        sent.pop_front();
                    } else {
                        break;
                    }
                }

                if sent.len() < self.max_requests {
                    sent.push_back(now);
                    return;
                }

                match sent.front() {
                    Some(oldest) => self.window.saturating_sub(now.duration_since(*oldest)),
                    None => continue,
                }
            };

            debug!(
                wait_ms = wait.as_millis() as u64,
                budget = self.max_requests,
                "Request budget exhausted, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Requests currently counted against the window
    pub async fn in_window(&self) -> usize {
        let mut sent = self.sent.lock().await;
        let now = Instant::now();
        sent.retain(|t| now.duration_since(*t) < self.window);
        sent.len()
    }
}
