//! Convenient re-exports for common Agora Resilience types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    batch::{batch_write, op, BatchOp, BatchStore, BatchWriter},
    error::{BuildError, ErrorKind, ForeignError, Normalizer, TypedError},
    rate_limit::{GcSampler, RateLimitLayer, RateLimitOptions, RateLimitResult, RateLimiter},
    retry::{with_retry, RetryPolicy, RetryPolicyBuilder},
    stack::ResilienceStack,
    telemetry::{LogSink, MemorySink, NullSink, PolicyEvent},
    timeout::{with_timeout, CancelSignal, TimeoutPolicy, MAX_TIMEOUT},
};
