//! Telemetry for the resilience core.
//!
//! Policies emit structured [`PolicyEvent`]s to an optional sink. Sinks are
//! `tower::Service<PolicyEvent>` implementations, so they can be logged, stored, or forwarded
//! to external systems (see the `agora-resilience-jsonl` crate).
//!
//! # Event Types
//!
//! - **Retry**: `Attempt`, `Exhausted`
//! - **Timeout**: `Occurred`
//! - **Rate limit** (middleware): `Admitted`, `Rejected`
//! - **Batch**: `Committed`, `Skipped`, `Failed`
//!
//! Emission is best-effort: a failing sink never changes the outcome of the operation.

pub mod events;
pub mod sinks;

pub use events::{BatchEvent, PolicyEvent, RateLimitEvent, RetryEvent, TimeoutEvent};
#[cfg(feature = "telemetry-json")]
pub use events::event_to_json;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, TelemetrySink};

use futures::future::BoxFuture;
use std::sync::Arc;
use tower_service::Service;

type EmitFn = dyn Fn(PolicyEvent) -> BoxFuture<'static, ()> + Send + Sync;

/// Type-erased handle to an optional sink, held by policies.
#[derive(Clone, Default)]
pub(crate) struct EventEmitter {
    sink: Option<Arc<EmitFn>>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter").field("enabled", &self.sink.is_some()).finish()
    }
}

impl EventEmitter {
    pub(crate) fn new<S>(sink: S) -> Self
    where
        S: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        S::Error: std::error::Error + Send + 'static,
        S::Future: Send + 'static,
    {
        let emit = move |event: PolicyEvent| -> BoxFuture<'static, ()> {
            Box::pin(emit_best_effort(sink.clone(), event))
        };
        Self { sink: Some(Arc::new(emit)) }
    }

    pub(crate) async fn emit(&self, event: PolicyEvent) {
        if let Some(sink) = &self.sink {
            sink(event).await;
        }
    }
}
