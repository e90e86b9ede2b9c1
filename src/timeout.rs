//! Deadline enforcement for a single asynchronous operation.
//!
//! [`TimeoutPolicy::execute`] races the operation against a tokio timer. Whichever settles first
//! decides the result; when the operation wins, the pending timer is dropped with the race.
//!
//! # What a timeout does not do
//!
//! On expiry the wrapped future is dropped, so its own code stops at the next suspension point.
//! Work it already handed off (a request written to the socket, a spawned task) is not recalled
//! and may still land later: a write reported as `Timeout` can still be applied. Retried writes
//! must therefore tolerate duplicates (`set`/merge rather than increment). Operations that spawn
//! work can use [`TimeoutPolicy::execute_with_cancel`] to observe the deadline and abandon it.

use crate::error::{BoxError, ContextMap, ErrorKind, Normalizer, TypedError};
use crate::telemetry::{EventEmitter, PolicyEvent, TimeoutEvent};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tower_service::Service;

/// Longest accepted deadline (1 day).
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Bounds the wall-clock wait for one operation.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    duration: Duration,
    context: ContextMap,
    normalizer: Normalizer,
    events: EventEmitter,
}

impl TimeoutPolicy {
    /// Create a timeout policy. Zero and anything above `MAX_TIMEOUT` are `Validation` errors.
    pub fn new(duration: Duration) -> Result<Self, TypedError> {
        if duration.is_zero() {
            return Err(TypedError::validation("timeout must be greater than zero")
                .with_context("timeout_ms", 0));
        }
        if duration > MAX_TIMEOUT {
            return Err(TypedError::validation("timeout must not exceed one day")
                .with_context("timeout_ms", duration.as_millis()));
        }
        Ok(Self {
            duration,
            context: ContextMap::new(),
            normalizer: Normalizer::default(),
            events: EventEmitter::default(),
        })
    }

    /// Create from a signed millisecond count, as received from callers and configuration.
    /// Zero and negative values are `Validation` errors.
    pub fn from_millis(timeout_ms: i64) -> Result<Self, TypedError> {
        match u64::try_from(timeout_ms) {
            Ok(ms) if ms > 0 => Self::new(Duration::from_millis(ms)),
            _ => Err(TypedError::validation(format!(
                "timeout must be a positive number of milliseconds (got {timeout_ms})"
            ))
            .with_context("timeout_ms", timeout_ms)),
        }
    }

    /// Attach a diagnostic entry (operation name, document id) to timeout failures.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    pub fn with_context_map(mut self, context: ContextMap) -> Self {
        self.context.extend(context);
        self
    }

    /// Use a custom normalizer for failures returned by the operation.
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Emit `TimeoutEvent`s to `sink`.
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        self.events = EventEmitter::new(sink);
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn context(&self) -> &ContextMap {
        &self.context
    }

    /// Run `operation` under the deadline.
    ///
    /// The operation's own failures are normalized; expiry yields `ErrorKind::Timeout` carrying
    /// the configured context and `timeout_ms`.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, TypedError>
    where
        Op: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        match tokio::time::timeout(self.duration, operation()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.normalizer.normalize(err.into())),
            Err(_) => Err(self.expired().await),
        }
    }

    /// Like [`execute`](Self::execute), but hands the operation a [`CancelSignal`] that fires
    /// when the deadline elapses.
    pub async fn execute_with_cancel<T, E, Fut, Op>(&self, operation: Op) -> Result<T, TypedError>
    where
        Op: FnOnce(CancelSignal) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let (tx, rx) = watch::channel(false);
        let signal = CancelSignal { rx };
        match tokio::time::timeout(self.duration, operation(signal)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(self.normalizer.normalize(err.into())),
            Err(_) => {
                tx.send_replace(true);
                Err(self.expired().await)
            }
        }
    }

    async fn expired(&self) -> TypedError {
        let timeout_ms = u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(timeout_ms, context = ?self.context, "operation timed out");
        self.events.emit(PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: self.duration })).await;
        TypedError::new(ErrorKind::Timeout, format!("operation timed out after {timeout_ms}ms"))
            .with_context_defaults(&self.context)
            .with_context("timeout_ms", timeout_ms)
    }
}

/// Observes the deadline of the [`TimeoutPolicy`] that created it.
///
/// Fires only on expiry. If the operation settles in time the signal never fires, and
/// [`cancelled`](Self::cancelled) stays pending.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the deadline has elapsed.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // Policy finished without expiring.
            futures::future::pending::<()>().await;
        }
    }
}

/// Run `operation` with a `timeout_ms` deadline.
///
/// A non-positive `timeout_ms`, or one above [`MAX_TIMEOUT`], fails with `ErrorKind::Validation`
/// before `operation` is invoked.
pub async fn with_timeout<T, E, Fut, Op>(
    operation: Op,
    timeout_ms: i64,
    context: ContextMap,
) -> Result<T, TypedError>
where
    Op: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    TimeoutPolicy::from_millis(timeout_ms)?.with_context_map(context).execute(operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForeignError;
    use crate::telemetry::MemorySink;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn resolves_before_the_timer() {
        let policy = TimeoutPolicy::from_millis(50).unwrap();
        let result = policy.execute(|| async { Ok::<_, TypedError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn never_resolving_operation_times_out_at_deadline() {
        let policy = TimeoutPolicy::from_millis(100).unwrap().with_context("operation", "load_feed");
        let start = tokio::time::Instant::now();

        let err = policy
            .execute(|| futures::future::pending::<Result<(), TypedError>>())
            .await
            .unwrap_err();

        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.context_value("timeout_ms"), Some("100"));
        assert_eq!(err.context_value("operation"), Some("load_feed"));
    }

    #[tokio::test]
    async fn non_positive_deadlines_fail_without_invoking() {
        for ms in [0, -5] {
            let invoked = Arc::new(AtomicUsize::new(0));
            let seen = invoked.clone();
            let err = with_timeout(
                move || {
                    seen.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, TypedError>(()) }
                },
                ms,
                ContextMap::new(),
            )
            .await
            .unwrap_err();

            assert_eq!(err.kind(), ErrorKind::Validation);
            assert_eq!(invoked.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let err = TimeoutPolicy::new(Duration::ZERO).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn deadlines_beyond_one_day_are_rejected_not_capped() {
        assert_eq!(TimeoutPolicy::new(MAX_TIMEOUT).unwrap().duration(), MAX_TIMEOUT);

        let err = TimeoutPolicy::new(MAX_TIMEOUT * 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.context_value("timeout_ms"), Some("172800000"));

        let invoked = Arc::new(AtomicBool::new(false));
        let flag = invoked.clone();
        let err = with_timeout(
            move || {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<_, TypedError>(()) }
            },
            2 * 86_400_000,
            ContextMap::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn operation_failures_are_normalized() {
        let policy = TimeoutPolicy::from_millis(1_000).unwrap();
        let err = policy
            .execute(|| async { Err::<(), _>(ForeignError::new("permission-denied", "nope")) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.code(), Some("permission-denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_the_cancel_signal() {
        let policy = TimeoutPolicy::from_millis(20).unwrap();
        let observed = Arc::new(AtomicBool::new(false));
        let flag = observed.clone();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let err = policy
            .execute_with_cancel(|signal| async move {
                tokio::spawn(async move {
                    let _ = started_tx.send(());
                    signal.cancelled().await;
                    flag.store(true, Ordering::SeqCst);
                });
                futures::future::pending::<Result<(), TypedError>>().await
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        started_rx.await.unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn completed_operation_leaves_signal_unfired() {
        let policy = TimeoutPolicy::from_millis(1_000).unwrap();
        let signal = policy
            .execute_with_cancel(|signal| async move { Ok::<_, TypedError>(signal) })
            .await
            .unwrap();
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_reported_to_the_sink() {
        let sink = MemorySink::new();
        let policy = TimeoutPolicy::from_millis(10).unwrap().with_sink(sink.clone());
        let _ = policy.execute(|| futures::future::pending::<Result<(), TypedError>>()).await;
        assert_eq!(
            sink.events(),
            vec![PolicyEvent::Timeout(TimeoutEvent::Occurred { timeout: Duration::from_millis(10) })]
        );
    }
}
