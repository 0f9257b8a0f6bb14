//! Error taxonomy for transfer outcomes.
//!
//! A transfer either completes with a `Response` or fails with a `TransferError`.
//! Failures are classified into a small, closed set of kinds so the metrics
//! collector can maintain a per-kind histogram without caring about the
//! underlying transport library's error representation.

use std::fmt;

/// The closed set of ways a transfer can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    ConnectionFailed,
    DnsError,
    TlsError,
    InvalidUrl,
    InvalidMethod,
    ScriptError,
    InternalError,
    Cancelled,
}

impl ErrorKind {
    /// Classify a `reqwest::Error` into the spec's error taxonomy.
    ///
    /// Mirrors the teacher's status/category dispatch in spirit, but maps onto
    /// the nine-kind taxonomy instead of the four-bucket client/server/network/timeout
    /// split: timeouts and connect/build/decode failures are distinguished first by
    /// the structured `reqwest::Error` predicates, then by sniffing the display
    /// string for DNS/TLS signatures the predicates don't expose directly.
    pub fn from_reqwest_error(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return ErrorKind::Timeout;
        }
        if error.is_builder() {
            return ErrorKind::InvalidUrl;
        }

        let msg = error.to_string().to_lowercase();
        if msg.contains("dns") || msg.contains("resolve") || msg.contains("lookup") {
            return ErrorKind::DnsError;
        }
        if msg.contains("certificate") || msg.contains("tls") || msg.contains("ssl") {
            return ErrorKind::TlsError;
        }
        if error.is_connect() {
            return ErrorKind::ConnectionFailed;
        }
        if error.is_request() || error.is_body() || error.is_decode() {
            return ErrorKind::ConnectionFailed;
        }

        ErrorKind::InternalError
    }

    /// Stable label used as a metrics dimension and in the final report histogram.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionFailed => "connection_failed",
            ErrorKind::DnsError => "dns_error",
            ErrorKind::TlsError => "tls_error",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::InvalidMethod => "invalid_method",
            ErrorKind::ScriptError => "script_error",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// All kinds in a stable order, used to pre-size per-kind counter arrays.
    pub fn all() -> [ErrorKind; 9] {
        [
            ErrorKind::Timeout,
            ErrorKind::ConnectionFailed,
            ErrorKind::DnsError,
            ErrorKind::TlsError,
            ErrorKind::InvalidUrl,
            ErrorKind::InvalidMethod,
            ErrorKind::ScriptError,
            ErrorKind::InternalError,
            ErrorKind::Cancelled,
        ]
    }

    /// Index into a dense `[T; 9]` counter array.
    pub fn index(&self) -> usize {
        match self {
            ErrorKind::Timeout => 0,
            ErrorKind::ConnectionFailed => 1,
            ErrorKind::DnsError => 2,
            ErrorKind::TlsError => 3,
            ErrorKind::InvalidUrl => 4,
            ErrorKind::InvalidMethod => 5,
            ErrorKind::ScriptError => 6,
            ErrorKind::InternalError => 7,
            ErrorKind::Cancelled => 8,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A failed transfer, produced instead of a `Response`.
#[derive(Debug, Clone)]
pub struct TransferError {
    pub kind: ErrorKind,
    pub message: String,
    /// Optional classified string (e.g. the raw transport error), kept
    /// separately from `message` so the report can show both a human summary
    /// and the underlying diagnostic.
    pub classified: Option<String>,
}

impl TransferError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            classified: None,
        }
    }

    pub fn with_classified(mut self, classified: impl Into<String>) -> Self {
        self.classified = Some(classified.into());
        self
    }

    pub fn from_reqwest(error: reqwest::Error) -> Self {
        let kind = ErrorKind::from_reqwest_error(&error);
        let message = error.to_string();
        Self::new(kind, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "transfer cancelled before completion")
    }

    pub fn timeout(timeout_ms: u64) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("request exceeded timeout of {timeout_ms}ms"),
        )
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.message)
    }
}

impl std::error::Error for TransferError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_labels_are_stable() {
        assert_eq!(ErrorKind::Timeout.label(), "timeout");
        assert_eq!(ErrorKind::DnsError.label(), "dns_error");
        assert_eq!(ErrorKind::Cancelled.label(), "cancelled");
    }

    #[test]
    fn all_kinds_have_distinct_indices() {
        let all = ErrorKind::all();
        let mut seen = std::collections::HashSet::new();
        for kind in all {
            assert!(seen.insert(kind.index()), "duplicate index for {kind:?}");
            assert!(kind.index() < 9);
        }
    }

    #[test]
    fn cancelled_error_has_cancelled_kind() {
        let err = TransferError::cancelled();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn display_includes_kind_label() {
        let err = TransferError::new(ErrorKind::Timeout, "boom");
        let shown = format!("{err}");
        assert!(shown.contains("timeout"));
        assert!(shown.contains("boom"));
    }
}
