//! Window arithmetic for the dual-window limiter.
//!
//! The minute window is anchored at the first call after it last rolled over; the day window
//! is the UTC calendar date. Both roll over as a full reset, never a prorated credit.

use super::store::RateLimitState;
use super::{RateLimitOptions, RateLimitResult};
use chrono::{DateTime, TimeZone, Utc};

/// Length of the short-burst window.
pub const MINUTE_WINDOW_MS: u64 = 60_000;

fn utc(now_ms: u64) -> DateTime<Utc> {
    i64::try_from(now_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// UTC calendar date (`YYYY-MM-DD`) containing `now_ms`.
pub fn day_key(now_ms: u64) -> String {
    utc(now_ms).format("%Y-%m-%d").to_string()
}

/// Milliseconds from `now_ms` to the next UTC midnight.
pub fn millis_until_next_utc_day(now_ms: u64) -> u64 {
    let now = utc(now_ms);
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight));
    match next_midnight {
        Some(midnight) => u64::try_from((midnight - now).num_milliseconds()).unwrap_or(0),
        None => 0,
    }
}

/// Whole seconds for a millisecond gap, rounded up and never below 1.
pub(crate) fn ceil_seconds(ms: u64) -> u64 {
    ms.div_ceil(1_000).max(1)
}

/// Reset whichever windows have elapsed at `now_ms`. The two checks are independent.
pub(crate) fn roll(state: &mut RateLimitState, now_ms: u64) {
    let today = day_key(now_ms);
    if state.day_key != today {
        state.day_count = 0;
        state.day_key = today;
    }
    if now_ms.saturating_sub(state.minute_window_start_ms) >= MINUTE_WINDOW_MS {
        state.minute_count = 0;
        state.minute_window_start_ms = now_ms;
    }
}

/// Decide a call against `state` as of `now_ms`, without mutating it.
///
/// `state` must already be rolled to `now_ms`.
pub(crate) fn evaluate(state: &RateLimitState, options: &RateLimitOptions, now_ms: u64) -> RateLimitResult {
    let minute_full = state.minute_count >= options.minute_limit;
    let day_full = state.day_count >= options.day_limit;

    if minute_full || day_full {
        // A full day outlasts any minute window, so it decides the wait.
        let wait_ms = if day_full {
            millis_until_next_utc_day(now_ms)
        } else {
            (state.minute_window_start_ms + MINUTE_WINDOW_MS).saturating_sub(now_ms)
        };
        return RateLimitResult {
            allowed: false,
            remaining_day: options.day_limit.saturating_sub(state.day_count),
            remaining_minute: options.minute_limit.saturating_sub(state.minute_count),
            retry_after_seconds: ceil_seconds(wait_ms),
        };
    }

    RateLimitResult {
        allowed: true,
        remaining_day: options.day_limit.saturating_sub(state.day_count),
        remaining_minute: options.minute_limit.saturating_sub(state.minute_count),
        retry_after_seconds: 0,
    }
}

/// Roll, decide, and on admission consume one slot from both windows.
///
/// `updated_at_ms` is refreshed either way; a rejection consumes nothing.
pub(crate) fn admit(state: &mut RateLimitState, options: &RateLimitOptions, now_ms: u64) -> RateLimitResult {
    roll(state, now_ms);
    state.updated_at_ms = now_ms;

    let decision = evaluate(state, options, now_ms);
    if !decision.allowed {
        return decision;
    }

    state.day_count = state.day_count.saturating_add(1);
    state.minute_count = state.minute_count.saturating_add(1);
    RateLimitResult {
        allowed: true,
        remaining_day: options.day_limit.saturating_sub(state.day_count),
        remaining_minute: options.minute_limit.saturating_sub(state.minute_count),
        retry_after_seconds: 0,
    }
}
