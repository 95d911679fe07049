//! Shared error type used across all Vantage crates.
//!
//! Every error carries a kind tag from the capture/pipeline taxonomy so
//! callers branch on the kind, never on message text. Transient kinds are
//! the ones retry loops are allowed to recover; everything else fails fast.

use uuid::Uuid;

/// Error classification shared by the capture worker, the governor, the
/// pipeline, and the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A deadline elapsed (per-capture, per-phase, or per-pipeline).
    Timeout,
    /// Hostname resolution failed.
    Dns,
    /// TCP/TLS connection failed.
    Connection,
    /// HTTP 4xx response — fail fast, no retry.
    Http4xx,
    /// HTTP 5xx response — transient.
    Http5xx,
    /// Response body unusable (empty, undecodable).
    Parse,
    /// Refused by the governor's circuit breaker or by URL policy.
    Blocked,
    /// The text-generation collaborator is unreachable or exhausted retries.
    LlmUnavailable,
    /// The repository is temporarily unavailable — retryable.
    StorageUnavailable,
    /// Snapshot owner (product/competitor) does not exist — fatal for the caller.
    OwnerNotFound,
    /// Input or invariant validation failed — surfaced synchronously.
    Validation,
    /// Governor wait bound exceeded; caller may queue.
    Congested,
    /// Daily/hourly capture budget exhausted.
    BudgetExceeded,
    /// Cooperative cancellation observed. Terminal, not counted as failure.
    Cancelled,
    /// Lost a creation race (e.g. duplicate project name).
    Duplicate,
    Unknown,
}

impl ErrorKind {
    /// Short wire code, also used as the `error` field on failed captures.
    pub fn code(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connection => "connection",
            Self::Http4xx => "http_4xx",
            Self::Http5xx => "http_5xx",
            Self::Parse => "parse",
            Self::Blocked => "blocked",
            Self::LlmUnavailable => "llm_unavailable",
            Self::StorageUnavailable => "storage_unavailable",
            Self::OwnerNotFound => "owner_not_found",
            Self::Validation => "validation_error",
            Self::Congested => "congested",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Cancelled => "cancelled",
            Self::Duplicate => "duplicate",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds a retry loop is allowed to recover.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Dns | Self::Connection | Self::Http5xx | Self::StorageUnavailable
        )
    }

    /// Kinds excluded from failure-rate SLIs.
    pub fn excluded_from_slis(self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Shared error carrying a taxonomy tag, a human message, and the
/// correlation id of the originating request when one exists.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", kind.code())]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: Option<Uuid>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageUnavailable, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_kind_code() {
        let err = Error::new(ErrorKind::Http4xx, "not found");
        assert_eq!(err.to_string(), "http_4xx: not found");
    }

    #[test]
    fn transient_kinds() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Dns.is_transient());
        assert!(ErrorKind::Connection.is_transient());
        assert!(ErrorKind::Http5xx.is_transient());
        assert!(ErrorKind::StorageUnavailable.is_transient());

        assert!(!ErrorKind::Http4xx.is_transient());
        assert!(!ErrorKind::Parse.is_transient());
        assert!(!ErrorKind::Blocked.is_transient());
        assert!(!ErrorKind::Cancelled.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
    }

    #[test]
    fn cancelled_excluded_from_slis() {
        assert!(ErrorKind::Cancelled.excluded_from_slis());
        assert!(!ErrorKind::Timeout.excluded_from_slis());
    }

    #[test]
    fn correlation_id_round_trip() {
        let id = Uuid::new_v4();
        let err = Error::validation("bad input").with_correlation(id);
        assert_eq!(err.correlation_id, Some(id));
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ErrorKind::Timeout.code(), "timeout");
        assert_eq!(ErrorKind::Http4xx.code(), "http_4xx");
        assert_eq!(ErrorKind::Validation.code(), "validation_error");
        assert_eq!(ErrorKind::Cancelled.code(), "cancelled");
    }
}
