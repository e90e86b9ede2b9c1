//! Default policies used by the application's read and write paths.
//!
//! - Reads: 2 retries, 150 ms base backoff, transient kinds only.
//! - Writes: 1 retry, 200 ms base backoff, transient kinds plus `ResourceExhausted`
//!   (write quota errors are usually short burst limits).
//! - Debate creation: admission-controlled at 10 per UTC day and 2 per minute per user.
//!
//! ```rust
//! use agora_resilience::presets;
//!
//! let reads = presets::read_stack().unwrap();
//! assert_eq!(reads.retry().max_retries(), 2);
//! ```

use crate::error::{BuildError, ErrorKind};
use crate::rate_limit::RateLimitOptions;
use crate::retry::{RetryPolicy, RetryPolicyBuilder, DEFAULT_MAX_BACKOFF};
use crate::stack::ResilienceStack;
use std::time::Duration;

pub const READ_MAX_RETRIES: u32 = 2;
pub const READ_BASE_BACKOFF: Duration = Duration::from_millis(150);
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub const WRITE_MAX_RETRIES: u32 = 1;
pub const WRITE_BASE_BACKOFF: Duration = Duration::from_millis(200);
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEBATE_KEY_PREFIX: &str = "create-debate";
pub const DEBATE_DAY_LIMIT: u32 = 10;
pub const DEBATE_MINUTE_LIMIT: u32 = 2;

/// Builder pre-populated with read-path settings, for further customization.
pub fn read_policy_builder() -> RetryPolicyBuilder {
    RetryPolicy::builder()
        .max_retries(READ_MAX_RETRIES)
        .base_backoff(READ_BASE_BACKOFF)
        .max_backoff(DEFAULT_MAX_BACKOFF)
        .retryable_kinds(ErrorKind::TRANSIENT)
}

/// Builder pre-populated with write-path settings, for further customization.
pub fn write_policy_builder() -> RetryPolicyBuilder {
    RetryPolicy::builder()
        .max_retries(WRITE_MAX_RETRIES)
        .base_backoff(WRITE_BASE_BACKOFF)
        .max_backoff(DEFAULT_MAX_BACKOFF)
        .retryable_kinds(ErrorKind::TRANSIENT)
        .retry_on(ErrorKind::ResourceExhausted)
}

pub fn read_policy() -> Result<RetryPolicy, BuildError> {
    read_policy_builder().build()
}

pub fn write_policy() -> Result<RetryPolicy, BuildError> {
    write_policy_builder().build()
}

pub fn read_stack() -> Result<ResilienceStack, BuildError> {
    ResilienceStack::builder().timeout(READ_TIMEOUT).retry(read_policy()?).build()
}

pub fn write_stack() -> Result<ResilienceStack, BuildError> {
    ResilienceStack::builder().timeout(WRITE_TIMEOUT).retry(write_policy()?).build()
}

/// Admission limits for AI-backed debate creation.
pub fn debate_creation_limits() -> RateLimitOptions {
    RateLimitOptions::new(DEBATE_KEY_PREFIX, DEBATE_DAY_LIMIT, DEBATE_MINUTE_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TypedError;

    #[test]
    fn reads_do_not_retry_quota_errors_but_writes_do() {
        let quota = TypedError::resource_exhausted("burst");
        assert!(!read_policy().unwrap().is_retryable(&quota));
        assert!(write_policy().unwrap().is_retryable(&quota));
    }

    #[test]
    fn write_backoff_starts_at_200ms() {
        let policy = write_policy().unwrap();
        assert_eq!(policy.max_retries(), 1);
        assert_eq!(policy.backoff().delay(0), Duration::from_millis(200));
    }

    #[test]
    fn neither_path_retries_permanent_failures() {
        for policy in [read_policy().unwrap(), write_policy().unwrap()] {
            for kind in [
                ErrorKind::Validation,
                ErrorKind::PermissionDenied,
                ErrorKind::NotFound,
                ErrorKind::AlreadyExists,
            ] {
                assert!(!policy.is_retryable(&TypedError::new(kind, "permanent")));
            }
        }
    }

    #[test]
    fn debate_limits() {
        let limits = debate_creation_limits();
        assert_eq!(limits.key("user_42"), "create-debate:user_42");
        assert_eq!((limits.day_limit, limits.minute_limit), (10, 2));
    }
}
