//! Shared HTTP error mapping for collaborator clients.

use std::time::Duration;

use parley_core::errors::ErrorClass;
use parley_core::retry::parse_retry_after;
use parley_core::{SessionError, TimeoutKind};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Longest response-body excerpt carried in an error message.
const BODY_EXCERPT: usize = 200;

/// Join `base` and `path` with exactly one slash.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Map a failure to send or receive a request.
pub(crate) fn request_error(
    operation: &'static str,
    err: &reqwest::Error,
    timeout: Duration,
) -> SessionError {
    if err.is_timeout() {
        return SessionError::Timeout {
            kind: TimeoutKind::Request,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        };
    }
    if err.is_connect() {
        return SessionError::from_class(operation, ErrorClass::Network, err.to_string());
    }
    SessionError::transport(operation, err.to_string())
}

/// Map a non-success response.
pub(crate) fn status_error(
    operation: &'static str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> SessionError {
    let excerpt: String = body.chars().take(BODY_EXCERPT).collect();
    let message = format!("HTTP {}: {excerpt}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_ms = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        return SessionError::RateLimit {
            retry_after_ms,
            message,
        };
    }
    SessionError::from_class(operation, ErrorClass::from_status(status.as_u16()), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use reqwest::header::HeaderValue;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(endpoint("http://h:1/", "/chat"), "http://h:1/chat");
        assert_eq!(endpoint("http://h:1/api", "health"), "http://h:1/api/health");
    }

    #[test]
    fn rate_limit_reads_retry_after() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let err = status_error("create_session", StatusCode::TOO_MANY_REQUESTS, &headers, "");
        assert_matches!(
            err,
            SessionError::RateLimit {
                retry_after_ms: Some(3000),
                ..
            }
        );
    }

    #[test]
    fn statuses_are_classified() {
        let headers = HeaderMap::new();
        let err = status_error("x", StatusCode::INTERNAL_SERVER_ERROR, &headers, "boom");
        assert_eq!(err.class(), ErrorClass::Server);
        assert!(err.is_retryable());
        let err = status_error("x", StatusCode::UNAUTHORIZED, &headers, "");
        assert_matches!(err, SessionError::Authentication(_));
        let err = status_error("x", StatusCode::NOT_FOUND, &headers, "");
        assert!(!err.is_retryable());
    }

    #[test]
    fn body_excerpt_is_bounded() {
        let body = "x".repeat(1000);
        let err = status_error("x", StatusCode::BAD_GATEWAY, &HeaderMap::new(), &body);
        assert!(err.to_string().len() < 300);
    }
}
