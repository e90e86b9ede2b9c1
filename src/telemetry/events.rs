use crate::error::ErrorKind;
use std::fmt;
use std::time::Duration;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Events emitted by the resilience core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyEvent {
    Retry(RetryEvent),
    Timeout(TimeoutEvent),
    RateLimit(RateLimitEvent),
    Batch(BatchEvent),
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A failed attempt is about to be retried after `delay`.
    Attempt {
        /// The upcoming attempt number (1 = first retry).
        attempt: u32,
        delay: Duration,
        /// Kind of the failure that triggered the retry.
        kind: ErrorKind,
    },
    /// The last permitted attempt failed with a retryable kind.
    Exhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        kind: ErrorKind,
    },
}

/// Events emitted by timeout policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// The deadline elapsed before the operation settled.
    Occurred { timeout: Duration },
}

/// Events emitted by the rate-limit middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitEvent {
    Admitted { key: String, remaining_day: u32, remaining_minute: u32 },
    Rejected { key: String, retry_after_seconds: u64 },
}

/// Events emitted by the batched write executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchEvent {
    Committed { operations: usize },
    /// Nothing to write; no batch was acquired.
    Skipped,
    Failed { operations: usize },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
            PolicyEvent::RateLimit(event) => write!(f, "RateLimit::{}", event),
            PolicyEvent::Batch(event) => write!(f, "Batch::{}", event),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay, kind } => {
                write!(f, "Attempt(#{}, delay={:?}, kind={})", attempt, delay, kind)
            }
            RetryEvent::Exhausted { attempts, kind } => {
                write!(f, "Exhausted(attempts={}, kind={})", attempts, kind)
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred(timeout={:?})", timeout),
        }
    }
}

impl fmt::Display for RateLimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitEvent::Admitted { key, remaining_day, remaining_minute } => write!(
                f,
                "Admitted({}, day_left={}, minute_left={})",
                key, remaining_day, remaining_minute
            ),
            RateLimitEvent::Rejected { key, retry_after_seconds } => {
                write!(f, "Rejected({}, retry_after={}s)", key, retry_after_seconds)
            }
        }
    }
}

impl fmt::Display for BatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchEvent::Committed { operations } => write!(f, "Committed(ops={})", operations),
            BatchEvent::Skipped => write!(f, "Skipped"),
            BatchEvent::Failed { operations } => write!(f, "Failed(ops={})", operations),
        }
    }
}

#[cfg(feature = "telemetry-json")]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a PolicyEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &PolicyEvent) -> serde_json::Value {
    match event {
        PolicyEvent::Retry(r) => match r {
            RetryEvent::Attempt { attempt, delay, kind } => json!({
                "kind": "retry_attempt",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
                "error_kind": kind.as_str(),
            }),
            RetryEvent::Exhausted { attempts, kind } => json!({
                "kind": "retry_exhausted",
                "attempts": *attempts,
                "error_kind": kind.as_str(),
            }),
        },
        PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout }) => json!({
            "kind": "timeout",
            "timeout_ms": clamp_u64(timeout.as_millis()),
        }),
        PolicyEvent::RateLimit(r) => match r {
            RateLimitEvent::Admitted { key, remaining_day, remaining_minute } => json!({
                "kind": "rate_limit_admitted",
                "key": key,
                "remaining_day": *remaining_day,
                "remaining_minute": *remaining_minute,
            }),
            RateLimitEvent::Rejected { key, retry_after_seconds } => json!({
                "kind": "rate_limit_rejected",
                "key": key,
                "retry_after_seconds": *retry_after_seconds,
            }),
        },
        PolicyEvent::Batch(b) => match b {
            BatchEvent::Committed { operations } => {
                json!({ "kind": "batch_committed", "operations": *operations })
            }
            BatchEvent::Skipped => json!({ "kind": "batch_skipped" }),
            BatchEvent::Failed { operations } => {
                json!({ "kind": "batch_failed", "operations": *operations })
            }
        },
    }
}
