//! Retry policy with exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

/// Retry policy for one connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Let a server `Retry-After` hint replace the computed delay.
    pub respect_retry_after: bool,
    /// Ceiling on elapsed time across all attempts of one call.
    pub retry_budget_ms: Option<u64>,
    /// Apply +/- 50% random jitter to computed delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            respect_retry_after: true,
            retry_budget_ms: None,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before retry number `attempt` (1-based):
    /// `initial * multiplier^(attempt-1)`, capped at `max_delay_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scale = self.backoff_multiplier.powi(exponent);
        let millis = (self.initial_delay_ms as f64 * scale).min(self.max_delay_ms as f64);
        let mut delay = Duration::from_millis(millis.max(0.0).round() as u64);

        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
            let random_offset = fastrand::u64(0..=(jitter_ms * 2));
            let total_ms = delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
            delay = Duration::from_millis(total_ms.max(0) as u64);
        }

        delay
    }

    /// Delay before retry number `attempt`, honoring a server hint when allowed.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) if self.respect_retry_after => hint,
            _ => self.backoff_delay(attempt),
        }
    }

    pub fn retry_budget(&self) -> Option<Duration> {
        self.retry_budget_ms.map(Duration::from_millis)
    }
}

/// Parses a `Retry-After` value: delta-seconds or an HTTP date.
///
/// Values a [`Duration`] cannot represent are treated as absent.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(seconds).ok();
    }

    // HTTP dates carry the obsolete "GMT" zone; normalize it to a numeric offset.
    let normalized = match value.strip_suffix(" GMT") {
        Some(prefix) => format!("{prefix} +0000"),
        None => value.to_owned(),
    };
    let at = OffsetDateTime::parse(&normalized, &Rfc2822).ok()?;
    let remaining = at - OffsetDateTime::now_utc();
    if remaining.is_positive() {
        Duration::try_from(remaining).ok()
    } else {
        Some(Duration::ZERO)
    }
}
