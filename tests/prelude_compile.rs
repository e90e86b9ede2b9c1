//! Compile-time prelude coverage test.
use agora_resilience::batch::memory::{MemoryBatch, MemoryStore};
use agora_resilience::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tower::service_fn;
use tower_layer::Layer;
use tower_service::Service;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let _backoff = Backoff::exponential(Duration::from_millis(100));
    let policy = RetryPolicy::builder().max_retries(0).build().expect("retry policy");
    let timeout = TimeoutPolicy::new(Duration::from_secs(1)).expect("timeout policy");
    let stack = ResilienceStack::new(timeout, policy);
    stack.execute(|| async { Ok::<_, TypedError>(()) }).await.expect("stack call failed");

    let store: MemoryStore<u8> = MemoryStore::new();
    batch_write(&store, vec![op(|b: &mut MemoryBatch<u8>| b.set("k", 1))]).await.expect("batch failed");

    let limiter = Arc::new(RateLimiter::new());
    let layer = RateLimitLayer::new(limiter, RateLimitOptions::new("prelude", 1, 1), |_: &()| {
        "anyone".to_string()
    });
    let mut svc = layer.layer(service_fn(|_req: ()| async { Ok::<_, TypedError>(()) }));
    svc.call(()).await.expect("service call failed");
}
