/// Block explorer rate limiter - free explorer tiers allow about 5 requests per second
use lazy_static::lazy_static;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::Network;

const MAX_REQUESTS_PER_WINDOW: usize = 5;

lazy_static! {
    static ref EXPLORER_LIMITERS: Mutex<HashMap<Network, SlidingWindow>> = Mutex::new(HashMap::new());
}

pub struct SlidingWindow {
    /// Timestamps of requests inside the current window
    request_times: VecDeque<Instant>,
    max_requests: usize,
    window: Duration,
}

impl SlidingWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            request_times: VecDeque::new(),
            max_requests,
            window,
        }
    }

    /// Record a request at `now`, or return how long to wait before retrying
    fn check_and_record(&mut self, now: Instant) -> Duration {
        while let Some(&front) = self.request_times.front() {
            if now.duration_since(front) >= self.window {
                self.request_times.pop_front();
            } else {
                break;
            }
        }

        if self.request_times.len() >= self.max_requests {
            if let Some(&oldest) = self.request_times.front() {
                return self.window - now.duration_since(oldest);
            }
        }

        self.request_times.push_back(now);
        Duration::ZERO
    }
}

/// Wait until a request to `network`'s explorer fits in the rate limit
pub async fn rate_limit_explorer(network: Network) {
    let key = network.explorer_key_network();
    loop {
        let wait = {
            let mut limiters = match EXPLORER_LIMITERS.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            limiters
                .entry(key)
                .or_insert_with(|| SlidingWindow::new(MAX_REQUESTS_PER_WINDOW, Duration::from_secs(1)))
                .check_and_record(Instant::now())
        };

        if wait.is_zero() {
            return;
        }

        tracing::debug!("{} explorer rate limit: waiting {}ms", key, wait.as_millis());
        tokio::time::sleep(wait).await;
    }
}
