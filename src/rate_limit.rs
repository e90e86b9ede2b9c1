//! Dual-window admission control keyed by purpose and caller identity.
//!
//! Each `"{prefix}:{identity}"` key carries two independent ceilings: a per-minute burst limit
//! on a window anchored at the first call after rollover, and a per-day quota on the UTC
//! calendar date. A call is admitted only if both have room; admission consumes one slot from
//! each, and a rejection consumes nothing.
//!
//! - [`RateLimiter`]: the keyed limiter. `check_at` takes the time explicitly; `check` reads
//!   the injected [`Clock`].
//! - [`RateLimitLayer`]: tower middleware that gates a service with a limiter.
//! - [`StateStore`]: storage seam; [`InMemoryStateStore`] is the single-process default.
//!
//! State is in-memory only and lost on restart. Stale keys are removed by sampled sweeps on
//! the request path (see [`gc`]).
//!
//! ```rust
//! use agora_resilience::rate_limit::{RateLimitOptions, RateLimiter};
//!
//! let limiter = RateLimiter::new();
//! let options = RateLimitOptions::new("create-debate", 10, 2);
//! let now = 1_710_072_000_000;
//!
//! assert!(limiter.check_at("user_42", &options, now).allowed);
//! assert!(limiter.check_at("user_42", &options, now + 1_000).allowed);
//!
//! let third = limiter.check_at("user_42", &options, now + 2_000);
//! assert!(!third.allowed);
//! assert_eq!(third.retry_after_seconds, 58);
//! ```

pub mod gc;
pub mod middleware;
pub mod store;
pub mod windows;

pub use gc::GcSampler;
pub use middleware::{RateLimitLayer, RateLimitService};
pub use store::{InMemoryStateStore, RateLimitState, StateStore};

use crate::clock::{Clock, WallClock};
use crate::error::{BuildError, ErrorKind, TypedError};
use std::sync::Arc;
use std::time::Duration;

/// Limits for one purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitOptions {
    /// Admissions per UTC calendar day. 0 rejects every call.
    pub day_limit: u32,
    /// Admissions per 60-second window. 0 rejects every call.
    pub minute_limit: u32,
    /// Purpose namespace, e.g. `create-debate`.
    pub key_prefix: String,
}

impl RateLimitOptions {
    pub fn new(key_prefix: impl Into<String>, day_limit: u32, minute_limit: u32) -> Self {
        Self { day_limit, minute_limit, key_prefix: key_prefix.into() }
    }

    /// Store key for `identity` under this purpose.
    pub fn key(&self, identity: &str) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining_day: u32,
    pub remaining_minute: u32,
    /// 0 when admitted, otherwise at least 1.
    pub retry_after_seconds: u64,
}

impl RateLimitResult {
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_seconds)
    }

    /// `ResourceExhausted` error describing this rejection, for surfacing to callers.
    pub fn to_error(&self, key: &str) -> TypedError {
        TypedError::new(
            ErrorKind::ResourceExhausted,
            format!("rate limit reached; retry in {}s", self.retry_after_seconds),
        )
        .with_code("resource-exhausted")
        .with_context("key", key)
        .with_context("retry_after_seconds", self.retry_after_seconds)
        .with_context("remaining_day", self.remaining_day)
        .with_context("remaining_minute", self.remaining_minute)
    }

    /// `Ok(self)` if admitted, otherwise [`to_error`](Self::to_error).
    pub fn into_result(self, key: &str) -> Result<Self, TypedError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(self.to_error(key))
        }
    }
}

/// Keyed dual-window limiter.
///
/// Safe to share across threads (wrap in an `Arc`); each check is a single atomic
/// read-modify-write on the store.
pub struct RateLimiter<S = InMemoryStateStore> {
    store: S,
    gc: GcSampler,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for RateLimiter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store)
            .field("gc", &self.gc)
            .field("stale_after", &self.stale_after)
            .field("clock", &self.clock)
            .finish()
    }
}

impl RateLimiter<InMemoryStateStore> {
    /// In-memory limiter with the wall clock and default garbage collection.
    pub fn new() -> Self {
        Self {
            store: InMemoryStateStore::new(),
            gc: GcSampler::default(),
            stale_after: gc::DEFAULT_STALE_AFTER,
            clock: Arc::new(WallClock),
        }
    }

    pub fn builder() -> RateLimiterBuilder<InMemoryStateStore> {
        RateLimiterBuilder::new()
    }
}

impl Default for RateLimiter<InMemoryStateStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateStore> RateLimiter<S> {
    /// Check and, if admitted, consume one slot for `identity` at the clock's current time.
    pub fn check(&self, identity: &str, options: &RateLimitOptions) -> RateLimitResult {
        self.check_at(identity, options, self.clock.now_millis())
    }

    /// Check and, if admitted, consume one slot for `identity` as of `now_ms`.
    pub fn check_at(&self, identity: &str, options: &RateLimitOptions, now_ms: u64) -> RateLimitResult {
        if self.gc.should_sweep() {
            self.sweep(now_ms);
        }

        let key = options.key(identity);
        let result = self.store.update(&key, now_ms, |state| windows::admit(state, options, now_ms));

        if result.allowed {
            tracing::trace!(
                key = %key,
                remaining_day = result.remaining_day,
                remaining_minute = result.remaining_minute,
                "rate limit admitted"
            );
        } else {
            tracing::debug!(
                key = %key,
                retry_after_seconds = result.retry_after_seconds,
                "rate limit rejected"
            );
        }
        result
    }

    /// Report what a check at `now_ms` would decide, without consuming or creating state.
    ///
    /// For an admissible call the remaining counts are those before consumption.
    pub fn peek(&self, identity: &str, options: &RateLimitOptions, now_ms: u64) -> RateLimitResult {
        let mut state = self
            .store
            .get(&options.key(identity))
            .unwrap_or_else(|| RateLimitState::fresh(now_ms));
        windows::roll(&mut state, now_ms);
        windows::evaluate(&state, options, now_ms)
    }

    /// Evict every entry untouched for longer than the staleness threshold as of `now_ms`.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let stale_ms = u64::try_from(self.stale_after.as_millis()).unwrap_or(u64::MAX);
        let evicted = self.store.evict_older_than(now_ms.saturating_sub(stale_ms));
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.store.len(), "rate limit state swept");
        }
        evicted
    }

    /// Tracked keys.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<S = InMemoryStateStore> {
    store: S,
    gc: GcSampler,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiterBuilder<InMemoryStateStore> {
    pub fn new() -> Self {
        Self {
            store: InMemoryStateStore::new(),
            gc: GcSampler::default(),
            stale_after: gc::DEFAULT_STALE_AFTER,
            clock: Arc::new(WallClock),
        }
    }
}

impl Default for RateLimiterBuilder<InMemoryStateStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: StateStore> RateLimiterBuilder<S> {
    /// Replace the state store.
    pub fn store<T: StateStore>(self, store: T) -> RateLimiterBuilder<T> {
        RateLimiterBuilder { store, gc: self.gc, stale_after: self.stale_after, clock: self.clock }
    }

    pub fn gc_sampler(mut self, sampler: GcSampler) -> Self {
        self.gc = sampler;
        self
    }

    /// Sweep on this share of checks. Validated in [`build`](Self::build).
    pub fn gc_probability(mut self, p: f64) -> Self {
        self.gc = GcSampler::Probability(p);
        self
    }

    /// Evict entries untouched for this long. Must be at least [`gc::MIN_STALE_AFTER`].
    pub fn stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> Result<RateLimiter<S>, BuildError> {
        if let GcSampler::Probability(p) = self.gc {
            GcSampler::probability(p)?;
        }
        if self.stale_after < gc::MIN_STALE_AFTER {
            return Err(BuildError::StalenessTooShort(self.stale_after));
        }
        Ok(RateLimiter { store: self.store, gc: self.gc, stale_after: self.stale_after, clock: self.clock })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    // 2024-03-10T12:00:00Z
    const T: u64 = 1_710_072_000_000;
    const DAY_MS: u64 = 86_400_000;

    fn limiter() -> RateLimiter {
        RateLimiter::builder().gc_sampler(GcSampler::Never).build().unwrap()
    }

    #[test]
    fn fourth_call_in_a_minute_is_rejected_with_window_remainder() {
        let limiter = limiter();
        let options = RateLimitOptions::new("posts", 5, 3);
        for offset in [0, 5_000, 10_000] {
            assert!(limiter.check_at("u1", &options, T + offset).allowed);
        }

        let fourth = limiter.check_at("u1", &options, T + 15_000);

        assert!(!fourth.allowed);
        assert_eq!(fourth.remaining_minute, 0);
        assert_eq!(fourth.remaining_day, 2);
        assert_eq!(fourth.retry_after_seconds, 45);
    }

    #[test]
    fn peek_does_not_consume_or_create() {
        let limiter = limiter();
        let options = RateLimitOptions::new("posts", 5, 3);

        let before = limiter.peek("u1", &options, T);
        assert!(before.allowed);
        assert_eq!(before.remaining_minute, 3);
        assert!(limiter.is_empty());

        limiter.check_at("u1", &options, T);
        assert_eq!(limiter.peek("u1", &options, T).remaining_minute, 2);
        assert_eq!(limiter.peek("u1", &options, T).remaining_minute, 2);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn check_reads_the_injected_clock() {
        let clock = ManualClock::new(T);
        let limiter = RateLimiter::builder()
            .gc_sampler(GcSampler::Never)
            .clock(clock.clone())
            .build()
            .unwrap();
        let options = RateLimitOptions::new("posts", 10, 1);

        assert!(limiter.check("u1", &options).allowed);
        assert!(!limiter.check("u1", &options).allowed);
        clock.advance(Duration::from_secs(60));
        assert!(limiter.check("u1", &options).allowed);
    }

    #[test]
    fn sweep_evicts_only_stale_keys() {
        let limiter = limiter();
        let options = RateLimitOptions::new("posts", 5, 3);
        limiter.check_at("idle", &options, T);
        limiter.check_at("active", &options, T + 2 * DAY_MS);

        assert_eq!(limiter.sweep(T + 2 * DAY_MS + 1), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.peek("active", &options, T + 2 * DAY_MS + 1).remaining_day, 4);
    }

    #[test]
    fn sampled_sweep_runs_before_the_check() {
        let limiter = RateLimiter::builder().gc_sampler(GcSampler::Always).build().unwrap();
        let options = RateLimitOptions::new("posts", 5, 3);
        limiter.check_at("idle", &options, T);

        limiter.check_at("other", &options, T + 3 * DAY_MS);

        assert_eq!(limiter.len(), 1);
        assert!(limiter.store().get("posts:idle").is_none());
    }

    #[test]
    fn rejection_converts_to_resource_exhausted() {
        let result = RateLimitResult { allowed: false, remaining_day: 3, remaining_minute: 0, retry_after_seconds: 58 };
        let err = result.into_result("create-debate:user_42").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert_eq!(err.retry_after_seconds(), Some(58));
        assert_eq!(err.context_value("key"), Some("create-debate:user_42"));
        assert_eq!(result.retry_after(), Duration::from_secs(58));
    }

    #[test]
    fn builder_validates_tunables() {
        assert_eq!(
            RateLimiter::builder().gc_probability(2.0).build().unwrap_err(),
            BuildError::InvalidProbability(2.0)
        );
        assert_eq!(
            RateLimiter::builder().stale_after(Duration::ZERO).build().unwrap_err(),
            BuildError::StalenessTooShort(Duration::ZERO)
        );
        assert_eq!(
            RateLimiter::builder().stale_after(Duration::from_secs(3_600)).build().unwrap_err(),
            BuildError::StalenessTooShort(Duration::from_secs(3_600))
        );
        assert!(RateLimiter::builder().stale_after(gc::MIN_STALE_AFTER).build().is_ok());
    }

    #[test]
    fn sweeping_never_restores_a_spent_daily_quota() {
        let limiter = RateLimiter::builder()
            .gc_sampler(GcSampler::Always)
            .stale_after(gc::MIN_STALE_AFTER)
            .build()
            .unwrap();
        let options = RateLimitOptions::new("posts", 1, 5);

        assert!(limiter.check_at("u1", &options, T).allowed);
        assert!(!limiter.check_at("u1", &options, T + 1_000).allowed);

        // Still 2024-03-10; the entry must survive every sweep until the day is over.
        let later = limiter.check_at("u1", &options, T + 2 * 60 * 60 * 1_000);
        assert!(!later.allowed);
        assert_eq!(later.remaining_day, 0);
        assert_eq!(limiter.len(), 1);
    }
}
