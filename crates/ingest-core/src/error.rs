//! Crate-wide error taxonomy.
//!
//! The teacher's `spark-core` splits errors into a `CoreError` /
//! `DomainError` / `ImplError` hierarchy meant for a generic `no_std`
//! transport framework. This system is a single `std`-only service, so the
//! hierarchy collapses to one enum: each variant corresponds to a row in the
//! transport-neutral error kind table, carrying enough context to answer
//! "what HTTP status", "is this retryable" and "does this need a stable
//! error code for logs/metrics" without a caller having to downcast.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stable, surface-agnostic error kind. Receivers map this to an HTTP
/// status; workers map it to retry/dead-letter routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    Forbidden,
    NotFound,
    Throttled,
    Unavailable,
    Internal,
    PoisonRecord,
    SinkTransient,
}

impl ErrorKind {
    /// HTTP status a receiver should answer with for this kind.
    pub const fn http_status(self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Throttled => 429,
            ErrorKind::Unavailable => 503,
            ErrorKind::Internal => 500,
            // Poison/transient are worker-internal; never answered to a producer.
            ErrorKind::PoisonRecord | ErrorKind::SinkTransient => 500,
        }
    }

    /// Whether a caller (or the worker retry loop) should try again.
    pub const fn retryable(self) -> bool {
        matches!(self, ErrorKind::Unavailable | ErrorKind::SinkTransient)
    }

    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Unauthenticated => "UNAUTHENTICATED",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Throttled => "THROTTLED",
            ErrorKind::Unavailable => "UNAVAILABLE",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::PoisonRecord => "POISON_RECORD",
            ErrorKind::SinkTransient => "SINK_TRANSIENT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The one error type passed between layers of this workspace.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("unauthenticated: missing or unrecognised credential")]
    Unauthenticated,

    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    #[error("source not found: {subject}")]
    NotFound { subject: String },

    #[error("throttled: retry after {retry_after:?}")]
    Throttled { retry_after: Duration },

    #[error("unavailable: {component}: {message}")]
    Unavailable { component: String, message: String },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("poison record {record_id}: {message}")]
    PoisonRecord { record_id: String, message: String },

    #[error("sink transient failure on attempt {attempt}: {message}")]
    SinkTransient { attempt: u32, message: String },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::InvalidInput { .. } => ErrorKind::InvalidInput,
            IngestError::Unauthenticated => ErrorKind::Unauthenticated,
            IngestError::Forbidden { .. } => ErrorKind::Forbidden,
            IngestError::NotFound { .. } => ErrorKind::NotFound,
            IngestError::Throttled { .. } => ErrorKind::Throttled,
            IngestError::Unavailable { .. } => ErrorKind::Unavailable,
            IngestError::Internal { .. } => ErrorKind::Internal,
            IngestError::PoisonRecord { .. } => ErrorKind::PoisonRecord,
            IngestError::SinkTransient { .. } => ErrorKind::SinkTransient,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    pub fn retryable(&self) -> bool {
        self.kind().retryable()
    }

    /// The `Retry-After` value a receiver should send alongside a 429
    /// (§7). `None` for every other kind.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            IngestError::Throttled { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        IngestError::InvalidInput { message: message.into() }
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        IngestError::Forbidden { reason: reason.into() }
    }

    pub fn not_found(subject: impl Into<String>) -> Self {
        IngestError::NotFound { subject: subject.into() }
    }

    pub fn unavailable(component: impl Into<String>, message: impl Into<String>) -> Self {
        IngestError::Unavailable { component: component.into(), message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        IngestError::Internal { message: message.into() }
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Unavailable { component: "io".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_to_status_matches_table() {
        assert_eq!(ErrorKind::InvalidInput.http_status(), 400);
        assert_eq!(ErrorKind::Unauthenticated.http_status(), 401);
        assert_eq!(ErrorKind::Forbidden.http_status(), 403);
        assert_eq!(ErrorKind::NotFound.http_status(), 404);
        assert_eq!(ErrorKind::Throttled.http_status(), 429);
        assert_eq!(ErrorKind::Unavailable.http_status(), 503);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn retry_after_is_only_set_on_throttled() {
        let throttled = IngestError::Throttled { retry_after: Duration::from_secs(5) };
        assert_eq!(throttled.retry_after(), Some(Duration::from_secs(5)));
        assert_eq!(IngestError::Unauthenticated.retry_after(), None);
    }

    #[test]
    fn only_unavailable_and_sink_transient_are_retryable() {
        assert!(ErrorKind::Unavailable.retryable());
        assert!(ErrorKind::SinkTransient.retryable());
        assert!(!ErrorKind::InvalidInput.retryable());
        assert!(!ErrorKind::Throttled.retryable());
        assert!(!ErrorKind::PoisonRecord.retryable());
    }
}
