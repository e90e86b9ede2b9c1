use agora_resilience::{presets, ErrorKind, ForeignError, TypedError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn quota_then_ok(calls: Arc<AtomicUsize>) -> impl FnMut() -> futures::future::Ready<Result<&'static str, ForeignError>> {
    move || {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            futures::future::ready(Err(ForeignError::new("resource-exhausted", "write burst")))
        } else {
            futures::future::ready(Ok("saved"))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn write_stack_retries_quota_errors_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let start = tokio::time::Instant::now();

    let value = presets::write_stack().unwrap().execute(quota_then_ok(calls.clone())).await.unwrap();

    assert_eq!(value, "saved");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(start.elapsed() >= presets::WRITE_BASE_BACKOFF);
}

#[tokio::test(start_paused = true)]
async fn read_stack_surfaces_quota_errors_immediately() {
    let calls = Arc::new(AtomicUsize::new(0));

    let err = presets::read_stack().unwrap().execute(quota_then_ok(calls.clone())).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn read_stack_gives_up_after_two_retries() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let err = presets::read_stack()
        .unwrap()
        .execute(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TypedError::new(ErrorKind::Aborted, "contention")) }
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.context_value("max_retries"), Some("2"));
}

#[test]
fn presets_use_expected_deadlines() {
    assert_eq!(presets::read_stack().unwrap().timeout().duration(), Duration::from_secs(10));
    assert_eq!(presets::write_stack().unwrap().timeout().duration(), Duration::from_secs(15));
}

#[cfg(feature = "serde")]
#[test]
fn retry_settings_load_from_json() {
    use agora_resilience::{RetryPolicy, RetrySettings};

    let settings: RetrySettings = serde_json::from_str(
        r#"{
            "max_retries": 3,
            "base_backoff_ms": 100,
            "max_backoff_ms": 400,
            "retryable_kinds": ["timeout", "resource_exhausted"]
        }"#,
    )
    .unwrap();
    let policy = RetryPolicy::from_settings(&settings).unwrap();

    assert_eq!(policy.max_retries(), 3);
    assert_eq!(policy.backoff().delay(5), Duration::from_millis(400));
    assert!(policy.is_retryable(&TypedError::resource_exhausted("quota")));
    assert!(!policy.is_retryable(&TypedError::new(ErrorKind::Network, "offline")));
}
