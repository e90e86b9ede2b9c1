//! Error taxonomy shared by every policy in the crate.
//!
//! Every failure that leaves this crate is a [`TypedError`]: a closed [`ErrorKind`], a
//! human-readable message, an optional raw backend code, and a diagnostic context map.
//! Retry decisions and UI messages are made by membership tests on the kind (or the raw code),
//! never by string matching on messages.
//!
//! Foreign failures are mapped into the taxonomy by a [`Normalizer`], which consults a
//! swappable [`CodeTable`] (backend code string -> kind). The default table knows the codes of
//! the managed document store the application talks to; other backends supply their own table.
//!
//! ```rust
//! use agora_resilience::error::{normalize, ErrorKind, ForeignError, TypedError};
//!
//! let raw = ForeignError::new("firestore/unavailable", "backend went away");
//! assert_eq!(normalize(raw).kind(), ErrorKind::Unavailable);
//!
//! let typed = TypedError::validation("title must not be empty");
//! assert_eq!(normalize(typed.clone()), typed);
//! ```

use crate::backoff::BackoffError;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Boxed error accepted from wrapped operations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Diagnostic key/value pairs attached to a [`TypedError`].
pub type ContextMap = HashMap<String, String>;

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Precondition or input failure.
    Validation,
    /// Deadline exceeded.
    Timeout,
    /// Connectivity failure.
    Network,
    /// Backend temporarily unavailable.
    Unavailable,
    /// Operation aborted by the backend (contention, cancelled transaction).
    Aborted,
    /// Quota or backpressure from the backend, or a local rate-limit rejection.
    ResourceExhausted,
    PermissionDenied,
    NotFound,
    AlreadyExists,
    Internal,
    /// Unrecognized foreign error.
    Unknown,
}

impl ErrorKind {
    /// Every kind, in declaration order.
    pub const ALL: [ErrorKind; 11] = [
        ErrorKind::Validation,
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::Unavailable,
        ErrorKind::Aborted,
        ErrorKind::ResourceExhausted,
        ErrorKind::PermissionDenied,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::Internal,
        ErrorKind::Unknown,
    ];

    /// Kinds retried by default: a later attempt may plausibly succeed.
    pub const TRANSIENT: [ErrorKind; 4] =
        [ErrorKind::Timeout, ErrorKind::Network, ErrorKind::Unavailable, ErrorKind::Aborted];

    /// Stable snake_case name.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Aborted => "aborted",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::Internal => "internal",
            ErrorKind::Unknown => "unknown",
        }
    }

    pub fn is_transient(self) -> bool {
        Self::TRANSIENT.contains(&self)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Taxonomy-tagged error raised by every component.
///
/// Values are built once (constructor plus `with_*` calls) and then only read. `context` is
/// diagnostic only; nothing in this crate branches on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TypedError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
    context: ContextMap,
}

impl TypedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), code: None, context: ContextMap::new() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Attach the raw backend code this error was normalized from.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach one diagnostic entry, replacing an existing value for the same key.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Attach entries from `context` whose keys are not already present.
    pub fn with_context_defaults(mut self, context: &ContextMap) -> Self {
        for (key, value) in context {
            self.context.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Raw backend code, when the error came from a foreign failure that carried one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn context(&self) -> &ContextMap {
        &self.context
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// Seconds until a rate-limited caller may try again, if a limiter attached one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.context_value("retry_after_seconds").and_then(|v| v.parse().ok())
    }

    /// Default end-user wording for this kind. Feature code is free to override it.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::Validation => "Some of the information entered is invalid.",
            ErrorKind::Timeout => "The request took too long. Please try again.",
            ErrorKind::Network => "You appear to be offline. Check your connection.",
            ErrorKind::Unavailable => "The service is temporarily unavailable.",
            ErrorKind::Aborted => "The request was interrupted. Please try again.",
            ErrorKind::ResourceExhausted => "Limit reached. Please wait before trying again.",
            ErrorKind::PermissionDenied => "You do not have permission to do that.",
            ErrorKind::NotFound => "That item no longer exists.",
            ErrorKind::AlreadyExists => "That item already exists.",
            ErrorKind::Internal | ErrorKind::Unknown => "Something went wrong.",
        }
    }
}

/// A failure reported by an external backend, optionally tagged with its own error code.
///
/// Backend adapters convert their native errors into this shape so the [`Normalizer`] can
/// classify them without knowing the adapter's types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ForeignError {
    code: Option<String>,
    message: String,
}

impl ForeignError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: Some(code.into()), message: message.into() }
    }

    pub fn without_code(message: impl Into<String>) -> Self {
        Self { code: None, message: message.into() }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Canonical form used for code lookups: last `/` segment, trimmed, lowercase, `_` -> `-`.
pub(crate) fn canonical_code(code: &str) -> String {
    let tail = code.rsplit('/').next().unwrap_or(code);
    tail.trim().to_ascii_lowercase().replace('_', "-")
}

/// Mapping from backend error codes to taxonomy kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTable {
    entries: HashMap<String, ErrorKind>,
}

impl CodeTable {
    /// A table that recognizes nothing; every coded error becomes `Unknown`.
    pub fn empty() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Add or replace a mapping.
    pub fn with(mut self, code: &str, kind: ErrorKind) -> Self {
        self.insert(code, kind);
        self
    }

    pub fn insert(&mut self, code: &str, kind: ErrorKind) -> Option<ErrorKind> {
        self.entries.insert(canonical_code(code), kind)
    }

    pub fn lookup(&self, code: &str) -> Option<ErrorKind> {
        self.entries.get(&canonical_code(code)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CodeTable {
    /// Codes emitted by the managed document store and its client SDK.
    fn default() -> Self {
        Self::empty()
            .with("deadline-exceeded", ErrorKind::Timeout)
            .with("timeout", ErrorKind::Timeout)
            .with("unavailable", ErrorKind::Unavailable)
            .with("aborted", ErrorKind::Aborted)
            .with("cancelled", ErrorKind::Aborted)
            .with("network-request-failed", ErrorKind::Network)
            .with("network", ErrorKind::Network)
            .with("resource-exhausted", ErrorKind::ResourceExhausted)
            .with("permission-denied", ErrorKind::PermissionDenied)
            .with("unauthenticated", ErrorKind::PermissionDenied)
            .with("not-found", ErrorKind::NotFound)
            .with("already-exists", ErrorKind::AlreadyExists)
            .with("invalid-argument", ErrorKind::Validation)
            .with("failed-precondition", ErrorKind::Validation)
            .with("out-of-range", ErrorKind::Validation)
            .with("internal", ErrorKind::Internal)
    }
}

/// Maps arbitrary failures into [`TypedError`]s.
///
/// Pure: the same input always yields the same output and nothing is logged or recorded.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    table: Arc<CodeTable>,
}

impl Normalizer {
    pub fn new(table: CodeTable) -> Self {
        Self { table: Arc::new(table) }
    }

    pub fn table(&self) -> &CodeTable {
        &self.table
    }

    /// Classify a boxed failure.
    ///
    /// A `TypedError` is returned unchanged. A `ForeignError` goes through the code table.
    /// Tokio's `Elapsed` and `std::io::Error` are recognized structurally; anything else is
    /// `Unknown` with the original message preserved.
    pub fn normalize(&self, err: BoxError) -> TypedError {
        let err = match err.downcast::<TypedError>() {
            Ok(typed) => return *typed,
            Err(other) => other,
        };
        let err = match err.downcast::<ForeignError>() {
            Ok(foreign) => return self.normalize_foreign(*foreign),
            Err(other) => other,
        };
        if err.is::<tokio::time::error::Elapsed>() {
            return TypedError::timeout(err.to_string());
        }
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return TypedError::new(io_kind(io.kind()), io.to_string());
        }
        TypedError::new(ErrorKind::Unknown, err.to_string())
    }

    pub fn normalize_foreign(&self, err: ForeignError) -> TypedError {
        let ForeignError { code, message } = err;
        match code {
            Some(code) => {
                let kind = self.table.lookup(&code).unwrap_or(ErrorKind::Unknown);
                TypedError::new(kind, message).with_code(code)
            }
            None => TypedError::new(ErrorKind::Unknown, message),
        }
    }
}

fn io_kind(kind: std::io::ErrorKind) -> ErrorKind {
    use std::io::ErrorKind as Io;
    match kind {
        Io::TimedOut => ErrorKind::Timeout,
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::BrokenPipe
        | Io::AddrNotAvailable => ErrorKind::Network,
        Io::Interrupted => ErrorKind::Aborted,
        Io::NotFound => ErrorKind::NotFound,
        Io::PermissionDenied => ErrorKind::PermissionDenied,
        Io::AlreadyExists => ErrorKind::AlreadyExists,
        Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    }
}

/// Normalize with the default code table.
pub fn normalize(err: impl Into<BoxError>) -> TypedError {
    static DEFAULT: OnceLock<Normalizer> = OnceLock::new();
    DEFAULT.get_or_init(Normalizer::default).normalize(err.into())
}

/// Errors produced while building policies.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Backoff(#[from] BackoffError),
    #[error("timeout must be greater than zero")]
    ZeroTimeout,
    #[error("timeout must not exceed one day (got {0:?})")]
    TimeoutTooLong(Duration),
    #[error("gc sample probability must be within [0, 1] (got {0})")]
    InvalidProbability(f64),
    #[error("staleness threshold must be at least one day and one minute (got {0:?})")]
    StalenessTooShort(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn user_message_is_fixed_per_kind() {
        let limited = TypedError::new(ErrorKind::ResourceExhausted, "create-debate:u1 over quota");
        assert_eq!(limited.user_message(), "Limit reached. Please wait before trying again.");
        assert_eq!(
            TypedError::new(ErrorKind::Timeout, "deadline 5000ms").user_message(),
            "The request took too long. Please try again."
        );
        assert_eq!(
            TypedError::new(ErrorKind::Unknown, "?").user_message(),
            TypedError::internal("boom").user_message()
        );
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = TypedError::new(ErrorKind::NotFound, "post p1 missing");
        assert_eq!(err.to_string(), "not_found: post p1 missing");
    }

    #[test]
    fn typed_errors_pass_through_unchanged() {
        let original = TypedError::validation("bad title").with_context("field", "title");
        assert_eq!(normalize(original.clone()), original);
    }

    #[test]
    fn foreign_codes_map_through_default_table() {
        let cases = [
            ("deadline-exceeded", ErrorKind::Timeout),
            ("unavailable", ErrorKind::Unavailable),
            ("aborted", ErrorKind::Aborted),
            ("network-request-failed", ErrorKind::Network),
            ("resource-exhausted", ErrorKind::ResourceExhausted),
            ("permission-denied", ErrorKind::PermissionDenied),
            ("not-found", ErrorKind::NotFound),
            ("already-exists", ErrorKind::AlreadyExists),
            ("invalid-argument", ErrorKind::Validation),
        ];
        for (code, kind) in cases {
            let err = normalize(ForeignError::new(code, "boom"));
            assert_eq!(err.kind(), kind, "code {code}");
            assert_eq!(err.code(), Some(code));
        }
    }

    #[test]
    fn code_lookup_ignores_prefix_case_and_underscores() {
        let table = CodeTable::default();
        assert_eq!(table.lookup("firestore/unavailable"), Some(ErrorKind::Unavailable));
        assert_eq!(table.lookup("RESOURCE_EXHAUSTED"), Some(ErrorKind::ResourceExhausted));
        assert_eq!(table.lookup("auth/network-request-failed"), Some(ErrorKind::Network));
    }

    #[test]
    fn unrecognized_and_missing_codes_are_unknown() {
        assert_eq!(normalize(ForeignError::new("quota-wobble", "?")).kind(), ErrorKind::Unknown);
        assert_eq!(normalize(ForeignError::without_code("?")).kind(), ErrorKind::Unknown);
        let plain: BoxError = "plain string error".into();
        let err = normalize(plain);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert_eq!(err.message(), "plain string error");
    }

    #[test]
    fn custom_table_replaces_backend_knowledge() {
        let normalizer = Normalizer::new(CodeTable::empty().with("503", ErrorKind::Unavailable));
        let err = normalizer.normalize(Box::new(ForeignError::new("503", "down")));
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        let err = normalizer.normalize(Box::new(ForeignError::new("unavailable", "down")));
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[test]
    fn io_errors_are_classified_structurally() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(normalize(refused).kind(), ErrorKind::Network);
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(normalize(timed_out).kind(), ErrorKind::Timeout);
        let other = io::Error::new(io::ErrorKind::Other, "odd");
        assert_eq!(normalize(other).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn context_defaults_do_not_override() {
        let mut defaults = ContextMap::new();
        defaults.insert("operation".into(), "load_feed".into());
        defaults.insert("attempt".into(), "99".into());
        let err = TypedError::timeout("slow").with_context("attempt", 1).with_context_defaults(&defaults);
        assert_eq!(err.context_value("operation"), Some("load_feed"));
        assert_eq!(err.context_value("attempt"), Some("1"));
    }

    #[test]
    fn retry_after_reads_limiter_context() {
        let err = TypedError::resource_exhausted("daily limit").with_context("retry_after_seconds", 58);
        assert_eq!(err.retry_after_seconds(), Some(58));
        assert_eq!(TypedError::internal("x").retry_after_seconds(), None);
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Aborted.is_transient());
        assert!(!ErrorKind::ResourceExhausted.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
    }
}
