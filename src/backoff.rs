//! Exponential backoff between retry attempts.
//!
//! Retry index semantics: `delay(0)` is the wait after the first failed attempt, `delay(1)` after
//! the second, and so on. The delay for index `n` is `min(max, base * 2^n)`.
//!
//! ```rust
//! use std::time::Duration;
//! use agora_resilience::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(4), Duration::from_millis(1600));
//! assert_eq!(backoff.delay(5), Duration::from_secs(2)); // capped
//! ```
//!
//! Overflow behavior: products that would overflow saturate to `MAX_BACKOFF` (1 day).

use std::time::Duration;

/// Upper bound on any computed delay (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("max backoff ({max:?}) must be >= base backoff ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Exponential backoff with an optional cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Self { base, max: None }
    }

    /// Build from millisecond bounds, as they appear in configuration.
    pub fn from_millis(base_ms: u64, max_ms: u64) -> Result<Self, BackoffError> {
        Self::exponential(Duration::from_millis(base_ms)).with_max(Duration::from_millis(max_ms))
    }

    /// Cap every delay at `max`. Fails if `max < base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Effective cap: the configured max, never above `MAX_BACKOFF`.
    pub fn max(&self) -> Duration {
        self.max.unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
    }

    /// Delay to wait after the failure of attempt `retry` (0-indexed).
    pub fn delay(&self, retry: u32) -> Duration {
        let multiplier = 2u128.saturating_pow(retry);
        let nanos = self.base.as_nanos().saturating_mul(multiplier);
        let capped = nanos.min(self.max().as_nanos());
        Duration::from_nanos(capped as u64)
    }

    /// The infinite delay schedule `delay(0), delay(1), ...`.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0u32..).map(move |retry| self.delay(retry))
    }
}
