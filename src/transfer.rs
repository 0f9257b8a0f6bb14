//! Request/response data model (component K) and the per-transfer context
//! a worker owns from dequeue to completion signal (component D).
//!
//! Header lookups are case-insensitive by lowercasing on ingest, matching
//! the teacher's `parse_headers_with_escapes`/`configure_custom_headers`
//! convention in `client.rs`.

use std::collections::HashMap;
use std::time::Duration;

use crate::errors::TransferError;

/// HTTP methods the engine can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Patch => reqwest::Method::PATCH,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

/// Splits a URL into `(host, port)`, defaulting the port by scheme when
/// the authority doesn't carry one explicitly. Shared by the DNS cache's
/// per-transfer warm-up and the run manager's client-build-time
/// resolution, so both agree on what "the target host" means for a URL.
pub fn extract_host_port(url: &str) -> Option<(String, u16)> {
    let is_https = url.starts_with("https://");
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let authority = without_scheme.split('/').next()?;
    let host = authority.split(':').next()?;
    if host.is_empty() {
        return None;
    }
    let port = authority
        .split(':')
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(if is_https { 443 } else { 80 });
    Some((host.to_string(), port))
}

/// Parses a method name case-insensitively. Unknown methods return `None`
/// rather than falling back silently — the caller decides whether that's
/// an `InvalidMethod` transfer error or a config validation rejection.
pub fn parse_method(s: &str) -> Option<Method> {
    match s.to_ascii_uppercase().as_str() {
        "GET" => Some(Method::Get),
        "POST" => Some(Method::Post),
        "PUT" => Some(Method::Put),
        "DELETE" => Some(Method::Delete),
        "PATCH" => Some(Method::Patch),
        "HEAD" => Some(Method::Head),
        "OPTIONS" => Some(Method::Options),
        _ => None,
    }
}

/// Maps common status codes to their canonical reason phrase.
///
/// Falls back to `"Unknown"` for anything not in the table, per the spec's
/// round-trip stability requirement (the mapping never changes for a given
/// input across calls).
pub fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// The six status-class buckets the metrics collector histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn of(code: u16) -> Self {
        match code {
            100..=199 => StatusClass::Informational,
            200..=299 => StatusClass::Success,
            300..=399 => StatusClass::Redirection,
            400..=499 => StatusClass::ClientError,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            StatusClass::Informational => 0,
            StatusClass::Success => 1,
            StatusClass::Redirection => 2,
            StatusClass::ClientError => 3,
            StatusClass::ServerError => 4,
            StatusClass::Other => 5,
        }
    }
}

/// Request body, present only for methods that carry one.
#[derive(Debug, Clone)]
pub enum Body {
    None,
    Raw(Vec<u8>),
    Form(Vec<(String, String)>),
}

/// Case-insensitive header map: keys are lowercased on insert, original
/// value bytes preserved.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let key = name.into().to_ascii_lowercase();
        self.entries.push((key, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Immutable description of a single HTTP transfer to perform.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub method: Method,
    pub headers: Headers,
    pub body: Body,
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub verify_tls: bool,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: Headers::new(),
            body: Body::None,
            timeout: Duration::from_secs(30),
            follow_redirects: true,
            max_redirects: 10,
            verify_tls: true,
        }
    }
}

/// Timing breakdown for a completed transfer, in milliseconds.
///
/// `total_ms ≈ dns_ms + connect_ms + tls_ms + first_byte_ms + download_ms`,
/// within transport rounding — `reqwest` does not expose the DNS/connect/TLS
/// phase boundaries directly, so `dns_ms`/`connect_ms`/`tls_ms` are derived
/// from the DNS cache's hit/miss state for the request's host (a cache hit
/// contributes `0` to `dns_ms`) and `connect_ms`/`tls_ms` are folded into a
/// single pre-first-byte figure when the transport doesn't distinguish them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timing {
    pub total_ms: u64,
    pub dns_ms: u64,
    pub connect_ms: u64,
    pub tls_ms: u64,
    pub first_byte_ms: u64,
    pub download_ms: u64,
}

/// A completed transfer's response.
#[derive(Debug, Clone)]
pub struct Response {
    /// 0 is reserved for "never produced a status" (should not occur for a
    /// value actually wrapped in `Ok`; kept for completeness with the spec).
    pub status: u16,
    pub status_text: &'static str,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub body_len: usize,
    pub timing: Timing,
}

impl Response {
    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(self.status)
    }
}

/// Outcome of a transfer: exactly one of `Response` or `TransferError`,
/// produced exactly once per submission (spec invariant 1).
pub type TransferOutcome = Result<Response, TransferError>;

/// Per-request state a worker owns exclusively from dequeue to completion.
///
/// Data-only per the spec; the worker thread is the sole owner, so no
/// synchronization is needed on the fields themselves. `submission_id`
/// ties the context back to the caller's callback registration.
pub struct TransferContext {
    pub submission_id: u64,
    pub request: Request,
    pub body_buffer: Vec<u8>,
    pub started_at: std::time::Instant,
}

impl TransferContext {
    pub fn new(submission_id: u64, request: Request) -> Self {
        Self {
            submission_id,
            request,
            body_buffer: Vec::new(),
            started_at: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_host_port_handles_scheme_and_explicit_port() {
        assert_eq!(
            extract_host_port("https://example.com:8443/path"),
            Some(("example.com".to_string(), 8443))
        );
        assert_eq!(
            extract_host_port("http://example.com/path"),
            Some(("example.com".to_string(), 80))
        );
    }

    #[test]
    fn extract_host_port_defaults_port_by_scheme() {
        assert_eq!(extract_host_port("https://example.com/path"), Some(("example.com".to_string(), 443)));
        assert_eq!(extract_host_port("http://example.com:9000/path"), Some(("example.com".to_string(), 9000)));
    }

    #[test]
    fn parse_method_round_trips_for_all_methods() {
        let methods = [
            Method::Get,
            Method::Post,
            Method::Put,
            Method::Delete,
            Method::Patch,
            Method::Head,
            Method::Options,
        ];
        for m in methods {
            assert_eq!(parse_method(m.as_str()), Some(m));
        }
    }

    #[test]
    fn parse_method_is_case_insensitive() {
        assert_eq!(parse_method("get"), Some(Method::Get));
        assert_eq!(parse_method("PoSt"), Some(Method::Post));
    }

    #[test]
    fn parse_method_rejects_unknown() {
        assert_eq!(parse_method("TRACE"), None);
    }

    #[test]
    fn status_text_known_and_unknown_codes() {
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(404), "Not Found");
        assert_eq!(status_text(999), "Unknown");
    }

    #[test]
    fn status_text_is_stable_across_calls() {
        assert_eq!(status_text(503), status_text(503));
    }

    #[test]
    fn status_class_buckets() {
        assert_eq!(StatusClass::of(101), StatusClass::Informational);
        assert_eq!(StatusClass::of(204), StatusClass::Success);
        assert_eq!(StatusClass::of(301), StatusClass::Redirection);
        assert_eq!(StatusClass::of(404), StatusClass::ClientError);
        assert_eq!(StatusClass::of(503), StatusClass::ServerError);
        assert_eq!(StatusClass::of(42), StatusClass::Other);
    }

    #[test]
    fn headers_are_case_insensitive_on_lookup() {
        let mut h = Headers::new();
        h.insert("Content-Type", "application/json");
        assert_eq!(h.get("content-type"), Some("application/json"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("application/json"));
    }
}
