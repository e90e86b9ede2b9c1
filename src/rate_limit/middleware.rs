use super::{InMemoryStateStore, RateLimitOptions, RateLimiter, StateStore};
use crate::error::{normalize, BoxError, TypedError};
use crate::telemetry::{EventEmitter, PolicyEvent, RateLimitEvent};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// Gates a service behind a [`RateLimiter`].
///
/// `identity` extracts the caller identity from each request. Rejected requests fail with
/// `ResourceExhausted` (carrying `retry_after_seconds`) and never reach the inner service.
pub struct RateLimitLayer<F, St = InMemoryStateStore> {
    limiter: Arc<RateLimiter<St>>,
    options: Arc<RateLimitOptions>,
    identity: F,
    events: EventEmitter,
}

impl<F, St> RateLimitLayer<F, St> {
    pub fn new(limiter: Arc<RateLimiter<St>>, options: RateLimitOptions, identity: F) -> Self {
        Self { limiter, options: Arc::new(options), identity, events: EventEmitter::default() }
    }

    /// Emit `RateLimitEvent`s to `sink`.
    pub fn with_sink<K>(mut self, sink: K) -> Self
    where
        K: Service<PolicyEvent, Response = ()> + Clone + Send + Sync + 'static,
        K::Error: std::error::Error + Send + 'static,
        K::Future: Send + 'static,
    {
        self.events = EventEmitter::new(sink);
        self
    }
}

impl<F: Clone, St> Clone for RateLimitLayer<F, St> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            options: self.options.clone(),
            identity: self.identity.clone(),
            events: self.events.clone(),
        }
    }
}

impl<F, St> std::fmt::Debug for RateLimitLayer<F, St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer").field("options", &self.options).finish_non_exhaustive()
    }
}

impl<Svc, F: Clone, St> Layer<Svc> for RateLimitLayer<F, St> {
    type Service = RateLimitService<Svc, F, St>;

    fn layer(&self, inner: Svc) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            options: self.options.clone(),
            identity: self.identity.clone(),
            events: self.events.clone(),
        }
    }
}

/// Service produced by [`RateLimitLayer`].
pub struct RateLimitService<Svc, F, St = InMemoryStateStore> {
    inner: Svc,
    limiter: Arc<RateLimiter<St>>,
    options: Arc<RateLimitOptions>,
    identity: F,
    events: EventEmitter,
}

impl<Svc: Clone, F: Clone, St> Clone for RateLimitService<Svc, F, St> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            options: self.options.clone(),
            identity: self.identity.clone(),
            events: self.events.clone(),
        }
    }
}

impl<Svc, F, St> std::fmt::Debug for RateLimitService<Svc, F, St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService").field("options", &self.options).finish_non_exhaustive()
    }
}

impl<Svc, F, St, Req> Service<Req> for RateLimitService<Svc, F, St>
where
    Svc: Service<Req>,
    Svc::Future: Send + 'static,
    Svc::Error: Into<BoxError> + Send,
    Svc::Response: Send + 'static,
    F: Fn(&Req) -> String,
    St: StateStore,
{
    type Response = Svc::Response;
    type Error = TypedError;
    type Future = BoxFuture<'static, Result<Svc::Response, TypedError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(normalize)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let identity = (self.identity)(&req);
        let key = self.options.key(&identity);
        let decision = self.limiter.check(&identity, &self.options);
        let events = self.events.clone();

        if !decision.allowed {
            return Box::pin(async move {
                events
                    .emit(PolicyEvent::RateLimit(RateLimitEvent::Rejected {
                        key: key.clone(),
                        retry_after_seconds: decision.retry_after_seconds,
                    }))
                    .await;
                Err(decision.to_error(&key))
            });
        }

        let response = self.inner.call(req);
        Box::pin(async move {
            events
                .emit(PolicyEvent::RateLimit(RateLimitEvent::Admitted {
                    key,
                    remaining_day: decision.remaining_day,
                    remaining_minute: decision.remaining_minute,
                }))
                .await;
            response.await.map_err(normalize)
        })
    }
}
