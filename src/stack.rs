//! Composition of retry and timeout: `retry(|| timeout(operation()))`.
//!
//! This is how every read and write exposed to the UI layer runs. Each attempt gets its own
//! deadline; a timed-out attempt counts as a `Timeout` failure for the retry policy.

use crate::error::{BoxError, BuildError, ContextMap, Normalizer, TypedError};
use crate::retry::RetryPolicy;
use crate::telemetry::PolicyEvent;
use crate::timeout::{TimeoutPolicy, MAX_TIMEOUT};
use std::future::Future;
use std::time::Duration;
use tower_service::Service;

/// Timeout-per-attempt wrapped in a retry policy.
#[derive(Debug, Clone)]
pub struct ResilienceStack {
    timeout: TimeoutPolicy,
    retry: RetryPolicy,
    context: ContextMap,
}

impl ResilienceStack {
    pub fn builder() -> ResilienceStackBuilder {
        ResilienceStackBuilder::new()
    }

    pub fn new(timeout: TimeoutPolicy, retry: RetryPolicy) -> Self {
        Self { timeout, retry, context: ContextMap::new() }
    }

    /// Same stack, with `key = value` attached to every failure it reports.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        self.timeout = self.timeout.with_context(key.clone(), value.clone());
        self.context.insert(key, value);
        self
    }

    pub fn timeout(&self) -> &TimeoutPolicy {
        &self.timeout
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `operation` with a fresh deadline per attempt.
    ///
    /// Every failure path ends in a normalized `TypedError` carrying the stack's context plus
    /// the retry annotations.
    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, TypedError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let timeout = &self.timeout;
        self.retry
            .execute(move || {
                let attempt = operation();
                timeout.execute(move || attempt)
            })
            .await
            .map_err(|err| err.with_context_defaults(&self.context))
    }
}

/// Builder for [`ResilienceStack`]. Unset parts fall back to the read-path presets.
#[derive(Default)]
pub struct ResilienceStackBuilder {
    timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    normalizer: Option<Normalizer>,
    context: ContextMap,
}

impl ResilienceStackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-attempt deadline.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Normalizer used by the timeout layer. The retry policy keeps its own.
    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn build(self) -> Result<ResilienceStack, BuildError> {
        let duration = self.timeout.unwrap_or(crate::presets::READ_TIMEOUT);
        let retry = match self.retry {
            Some(policy) => policy,
            None => crate::presets::read_policy()?,
        };
        let normalizer = self.normalizer.unwrap_or_else(|| retry.normalizer().clone());
        if duration.is_zero() {
            return Err(BuildError::ZeroTimeout);
        }
        if duration > MAX_TIMEOUT {
            return Err(BuildError::TimeoutTooLong(duration));
        }
        let timeout = TimeoutPolicy::new(duration)
            .map_err(|_| BuildError::TimeoutTooLong(duration))?
            .with_normalizer(normalizer)
            .with_context_map(self.context.clone());
        Ok(ResilienceStack { timeout, retry, context: self.context })
    }

    /// Build with `TimeoutEvent`s routed to `sink`. Retry events follow the retry policy's own
    /// sink.
    pub fn build_with_sink<S>(self, sink: S) -> Result<ResilienceStack, BuildError>
    where
        S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let mut stack = self.build()?;
        stack.timeout = stack.timeout.with_sink(sink);
        Ok(stack)
    }
}
