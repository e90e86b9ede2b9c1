#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Agora Resilience
//!
//! Resilience and rate-limiting core for the Agora backend: every read and write that talks to
//! the document store runs through it, and expensive operations are gated by a per-user limiter.
//!
//! ## Features
//!
//! - **Error taxonomy**: a closed set of [`ErrorKind`]s and a [`Normalizer`] that maps
//!   backend error codes, I/O errors and timer expiry into [`TypedError`]
//! - **Timeouts** per operation, with an optional [`CancelSignal`] for work that can be abandoned
//! - **Retries** with capped exponential backoff for retryable kinds only
//! - **Batched writes** committed all-or-nothing, skipping empty batches
//! - **Rate limiting** with a per-minute burst window and a per-UTC-day quota
//!
//! ## Quick Start
//!
//! ```rust
//! use agora_resilience::{presets, ErrorKind, ForeignError, TypedError};
//!
//! #[tokio::main]
//! async fn main() {
//!     let reads = presets::read_stack().unwrap();
//!
//!     let feed = reads
//!         .execute(|| async { Ok::<_, TypedError>(vec!["post-1", "post-2"]) })
//!         .await
//!         .unwrap();
//!     assert_eq!(feed.len(), 2);
//!
//!     let err = reads
//!         .execute(|| async { Err::<(), _>(ForeignError::new("not-found", "no such group")) })
//!         .await
//!         .unwrap_err();
//!     assert_eq!(err.kind(), ErrorKind::NotFound);
//! }
//! ```

pub mod backoff;
pub mod batch;
pub mod clock;
pub mod error;
pub mod presets;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod stack;
pub mod telemetry;
pub mod timeout;

pub mod prelude;

// Re-exports
pub use backoff::{Backoff, BackoffError};
pub use batch::{batch_write, BatchStore, BatchWriter};
pub use clock::{Clock, ManualClock, WallClock};
pub use error::{
    normalize, BoxError, BuildError, CodeTable, ContextMap, ErrorKind, ForeignError, Normalizer,
    TypedError,
};
pub use rate_limit::{
    RateLimitLayer, RateLimitOptions, RateLimitResult, RateLimiter, RateLimiterBuilder,
};
pub use retry::{with_retry, RetryPolicy, RetryPolicyBuilder, RetrySettings};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use stack::{ResilienceStack, ResilienceStackBuilder};
pub use timeout::{with_timeout, CancelSignal, TimeoutPolicy};
