//! Retry policy for fallible async operations.
//!
//! Semantics:
//! - `max_retries` counts *additional* attempts after the first, so `max_retries = 0` means
//!   exactly one attempt and no backoff is ever computed.
//! - The operation factory is invoked fresh on every attempt; a settled future is never
//!   polled again.
//! - Every failure is normalized into a [`TypedError`]. It is retried only if its kind is in
//!   the policy's retryable set, or its raw backend code is in the retryable code set.
//! - The wait after failed attempt `n` (0-indexed) is `min(max_backoff, base_backoff * 2^n)`.
//! - The final error is the last normalized failure, annotated with `attempt` (0-indexed
//!   index of the final attempt) and `max_retries`. There is no separate "gave up" error.
//!
//! Attempts are strictly sequential. A timed-out attempt may still complete in the
//! background (see [`crate::timeout`]), so retried operations should be idempotent.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use agora_resilience::{ErrorKind, ForeignError, RetryPolicy, TypedError};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .base_backoff(Duration::from_millis(150))
//!     .build()
//!     .unwrap();
//! let result: Result<(), TypedError> = policy
//!     .execute(|| async { Err(ForeignError::new("not-found", "post p1")) })
//!     .await;
//! assert_eq!(result.unwrap_err().kind(), ErrorKind::NotFound); // not retried
//! # });
//! ```

use crate::backoff::Backoff;
use crate::error::{canonical_code, BoxError, BuildError, ErrorKind, Normalizer, TypedError};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{EventEmitter, PolicyEvent, RetryEvent};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tower_service::Service;

/// Default cap on a single backoff wait.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Retry policy combining backoff, retryable kinds/codes, normalizer, and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff: Backoff,
    retryable_kinds: HashSet<ErrorKind>,
    retryable_codes: HashSet<String>,
    normalizer: Normalizer,
    sleeper: Arc<dyn Sleeper>,
    events: EventEmitter,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("retryable_kinds", &self.retryable_kinds)
            .field("retryable_codes", &self.retryable_codes)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl RetryPolicy {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Build from deserializable settings.
    pub fn from_settings(settings: &RetrySettings) -> Result<Self, BuildError> {
        RetryPolicy::builder()
            .max_retries(settings.max_retries)
            .base_backoff(Duration::from_millis(settings.base_backoff_ms))
            .max_backoff(Duration::from_millis(settings.max_backoff_ms))
            .retryable_kinds(settings.retryable_kinds.iter().copied())
            .retryable_codes(settings.retryable_codes.iter().map(String::as_str))
            .build()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Whether `err` justifies another attempt under this policy.
    pub fn is_retryable(&self, err: &TypedError) -> bool {
        self.retryable_kinds.contains(&err.kind())
            || err.code().is_some_and(|code| self.retryable_codes.contains(&canonical_code(code)))
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, TypedError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let mut attempt: u32 = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => self.normalizer.normalize(err.into()),
            };

            let retryable = self.is_retryable(&err);
            if attempt >= self.max_retries || !retryable {
                if retryable {
                    tracing::warn!(
                        attempts = attempt + 1,
                        kind = %err.kind(),
                        error = %err,
                        "retries exhausted"
                    );
                    self.events
                        .emit(PolicyEvent::Retry(RetryEvent::Exhausted {
                            attempts: attempt + 1,
                            kind: err.kind(),
                        }))
                        .await;
                }
                return Err(err
                    .with_context("attempt", attempt)
                    .with_context("max_retries", self.max_retries));
            }

            let delay = self.backoff.delay(attempt);
            tracing::debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                kind = %err.kind(),
                "retrying after failure"
            );
            self.events
                .emit(PolicyEvent::Retry(RetryEvent::Attempt {
                    attempt: attempt + 1,
                    delay,
                    kind: err.kind(),
                }))
                .await;
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Run `operation` under `policy`.
pub async fn with_retry<T, E, Fut, Op>(operation: Op, policy: &RetryPolicy) -> Result<T, TypedError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    policy.execute(operation).await
}

/// Plain retry configuration, suitable for loading from a config file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub retryable_kinds: Vec<ErrorKind>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub retryable_codes: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 150,
            max_backoff_ms: 2_000,
            retryable_kinds: ErrorKind::TRANSIENT.to_vec(),
            retryable_codes: Vec::new(),
        }
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder {
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    retryable_kinds: HashSet<ErrorKind>,
    retryable_codes: HashSet<String>,
    normalizer: Normalizer,
    sleeper: Arc<dyn Sleeper>,
    events: EventEmitter,
}

impl RetryPolicyBuilder {
    /// Defaults: 2 retries, 150 ms base, 2 s cap, transient kinds retryable.
    pub fn new() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(150),
            max_backoff: DEFAULT_MAX_BACKOFF,
            retryable_kinds: ErrorKind::TRANSIENT.into_iter().collect(),
            retryable_codes: HashSet::new(),
            normalizer: Normalizer::default(),
            sleeper: Arc::new(TokioSleeper),
            events: EventEmitter::default(),
        }
    }

    /// Additional attempts after the first.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn base_backoff(mut self, base: Duration) -> Self {
        self.base_backoff = base;
        self
    }

    /// Must be >= the base backoff; checked by `build`.
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Replace the retryable kind set.
    pub fn retryable_kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = ErrorKind>,
    {
        self.retryable_kinds = kinds.into_iter().collect();
        self
    }

    /// Add one retryable kind.
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable_kinds.insert(kind);
        self
    }

    /// Replace the retryable raw-code set.
    pub fn retryable_codes<'a, I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.retryable_codes = codes.into_iter().map(canonical_code).collect();
        self
    }

    /// Add one retryable raw backend code, matched regardless of its classified kind.
    pub fn retry_on_code(mut self, code: &str) -> Self {
        self.retryable_codes.insert(canonical_code(code));
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Emit `RetryEvent`s to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        self.events = EventEmitter::new(sink);
        self
    }

    /// Build the retry policy, validating the backoff bounds.
    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        let backoff = Backoff::exponential(self.base_backoff).with_max(self.max_backoff)?;
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            backoff,
            retryable_kinds: self.retryable_kinds,
            retryable_codes: self.retryable_codes,
            normalizer: self.normalizer,
            sleeper: self.sleeper,
            events: self.events,
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
