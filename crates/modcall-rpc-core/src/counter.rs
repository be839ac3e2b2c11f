//! Request counting for rate limiting.
//!
//! The limiter only needs two operations from its store: record an occurrence
//! under an endpoint key, and count occurrences in a time window. Storage and
//! retention belong to the [`RequestCounter`] implementation; the crate ships an
//! in-memory one.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::RpcError;

/// Store of request occurrences, shared by every session
pub trait RequestCounter: Send + Sync {
    /// Record one request under `key` at `at`
    fn register_request(&self, key: &str, at: Instant);

    /// Number of requests recorded under `key` in the half-open window `(from, to]`
    fn count_requests(&self, key: &str, from: Instant, to: Instant) -> usize;

    /// Keep every request for at least `window`. Called by each limiter for
    /// its interval before it counts anything.
    fn retain_at_least(&self, _window: Duration) {}
}

/// Threshold and window of a rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimit {
    /// Requests allowed inside one window
    pub threshold: usize,
    /// Length of the trailing window
    pub interval: Duration,
}

impl Default for RequestLimit {
    fn default() -> Self {
        Self {
            threshold: 1000,
            interval: Duration::from_secs(10),
        }
    }
}

impl RequestLimit {
    pub fn new(threshold: usize, interval: Duration) -> Self {
        Self {
            threshold,
            interval,
        }
    }

    /// Count the trailing window for `key`, then record this request.
    ///
    /// The request is recorded whether or not it is rejected.
    pub fn check(
        &self,
        counter: &dyn RequestCounter,
        key: &str,
        now: Instant,
    ) -> Result<(), RpcError> {
        // The monotonic clock starts at boot; a window reaching past it covers everything.
        let from = now.checked_sub(self.interval).unwrap_or(now);
        let count = counter.count_requests(key, from, now);
        counter.register_request(key, now);

        if count >= self.threshold {
            Err(RpcError::RateLimitExceeded {
                key: key.to_string(),
                threshold: self.threshold,
                interval: self.interval,
            })
        } else {
            Ok(())
        }
    }
}

/// Sliding-window counter kept in process memory.
///
/// Entries older than the retention period are dropped as they are written,
/// and keys left without entries are swept once per retention period, so
/// memory stays bounded by the request rate.
#[derive(Debug)]
pub struct InMemoryRequestCounter {
    windows: Mutex<Windows>,
}

#[derive(Debug)]
struct Windows {
    retention: Duration,
    by_key: HashMap<String, VecDeque<Instant>>,
    swept_at: Option<Instant>,
}

fn prune(timestamps: &mut VecDeque<Instant>, horizon: Instant) {
    while timestamps.front().is_some_and(|t| *t <= horizon) {
        timestamps.pop_front();
    }
}

impl InMemoryRequestCounter {
    pub fn new(retention: Duration) -> Self {
        Self {
            windows: Mutex::new(Windows {
                retention,
                by_key: HashMap::new(),
                swept_at: None,
            }),
        }
    }

    pub fn retention(&self) -> Duration {
        self.windows.lock().retention
    }

    /// Number of keys currently tracked
    pub fn key_count(&self) -> usize {
        self.windows.lock().by_key.len()
    }
}

impl Default for InMemoryRequestCounter {
    fn default() -> Self {
        Self::new(RequestLimit::default().interval)
    }
}

impl RequestCounter for InMemoryRequestCounter {
    fn register_request(&self, key: &str, at: Instant) {
        let mut windows = self.windows.lock();

        if let Some(horizon) = at.checked_sub(windows.retention) {
            if windows.swept_at.is_none_or(|swept| swept <= horizon) {
                windows.by_key.retain(|_, timestamps| {
                    prune(timestamps, horizon);
                    !timestamps.is_empty()
                });
                windows.swept_at = Some(at);
            }
            if let Some(timestamps) = windows.by_key.get_mut(key) {
                prune(timestamps, horizon);
            }
        }

        windows
            .by_key
            .entry(key.to_string())
            .or_default()
            .push_back(at);
    }

    fn count_requests(&self, key: &str, from: Instant, to: Instant) -> usize {
        self.windows
            .lock()
            .by_key
            .get(key)
            .map(|timestamps| timestamps.iter().filter(|t| **t > from && **t <= to).count())
            .unwrap_or(0)
    }

    fn retain_at_least(&self, window: Duration) {
        let mut windows = self.windows.lock();
        windows.retention = windows.retention.max(window);
    }
}
