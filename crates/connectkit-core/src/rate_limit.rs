//! Token-bucket admission control with adaptive suspension.
//!
//! Every connector instance owns at most one [`RateLimiter`]. Its state sits
//! behind a single mutex so concurrent `wait_for_slot` calls never both take
//! the last token. The lock is never held across an await point.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::retry::parse_retry_after;

const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Rate-limit policy for one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Sustained rate. `0` disables admission control entirely.
    pub requests_per_second: f64,
    /// Bucket size. Unset uses `requests_per_second`; `0` disables bursting.
    pub burst_capacity: Option<u32>,
    /// Feed `x-ratelimit-*` / `retry-after` response headers into the limiter.
    pub adaptive_from_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_capacity: None,
            adaptive_from_headers: true,
        }
    }
}

impl RateLimitConfig {
    pub fn per_second(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self::per_second(0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.requests_per_second > 0.0
    }

    fn capacity(&self) -> f64 {
        match self.burst_capacity {
            Some(0) => 1.0,
            Some(burst) => f64::from(burst),
            None => self.requests_per_second.ceil().max(1.0),
        }
    }
}

/// Rate-limit signals parsed from one response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<f64>,
}

impl RateLimitInfo {
    /// Reads the conventional rate-limit headers. Returns `None` when the
    /// response carried none of them.
    pub fn from_headers(headers: &BTreeMap<String, String>) -> Option<Self> {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.trim().parse::<u64>().ok())
        };

        let info = Self {
            limit: number("x-ratelimit-limit"),
            remaining: number("x-ratelimit-remaining"),
            reset: number("x-ratelimit-reset"),
            retry_after_seconds: headers
                .get("retry-after")
                .and_then(|value| parse_retry_after(value))
                .map(|delay| delay.as_secs_f64()),
        };

        (info != Self::default()).then_some(info)
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_seconds
            .filter(|seconds| *seconds > 0.0)
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
    }
}

/// Point-in-time view of the bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitState {
    pub capacity: f64,
    pub tokens: f64,
    pub refill_rate: f64,
    pub suspended_until: Option<Instant>,
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
    suspended_until: Option<Instant>,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        if let Some(until) = self.suspended_until {
            if now < until {
                return;
            }
            // Refill resumes from the end of the suspension, not from before it.
            self.suspended_until = None;
            self.last_refill = until;
        }

        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }
}

/// Token bucket shared by all concurrent calls on one connector.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Builds a limiter, or `None` when the policy disables admission control.
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        if !config.is_enabled() {
            return None;
        }

        let capacity = config.capacity();
        Some(Self {
            bucket: Mutex::new(Bucket {
                capacity,
                tokens: capacity,
                refill_rate: config.requests_per_second,
                last_refill: Instant::now(),
                suspended_until: None,
            }),
        })
    }

    pub fn can_proceed(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        bucket.tokens >= 1.0
    }

    /// Waits until a token is available and consumes it.
    pub async fn wait_for_slot(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            tokio::time::sleep(SLOT_POLL_INTERVAL).await;
        }
    }

    /// Consumes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock();
        bucket.refill(Instant::now());
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// A positive retry-after signal drains the bucket and suspends refill.
    pub fn update_from_response(&self, info: &RateLimitInfo) {
        let Some(retry_after) = info.retry_after() else {
            return;
        };

        let Some(until) = Instant::now().checked_add(retry_after) else {
            tracing::warn!(
                retry_after_secs = retry_after.as_secs(),
                "ignoring retry-after signal beyond the clock's range"
            );
            return;
        };

        let mut bucket = self.lock();
        bucket.tokens = 0.0;
        bucket.suspended_until = Some(match bucket.suspended_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        tracing::debug!(
            retry_after_ms = retry_after.as_millis() as u64,
            "rate limiter suspended by server signal"
        );
    }

    pub fn state(&self) -> RateLimitState {
        let bucket = self.lock();
        RateLimitState {
            capacity: bucket.capacity,
            tokens: bucket.tokens,
            refill_rate: bucket.refill_rate,
            suspended_until: bucket.suspended_until,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().expect("rate limiter lock is not poisoned")
    }
}
