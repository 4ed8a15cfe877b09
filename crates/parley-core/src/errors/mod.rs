//! Error hierarchy for the session layer.
//!
//! - [`SessionError`]: every failure a caller of the session layer can see
//! - [`ValidationError`]: caller mistakes, surfaced immediately and never retried
//! - [`TimeoutKind`]: which deadline elapsed
//!
//! [`classify`] folds error strings, HTTP statuses, and close codes into
//! [`ErrorClass`] for retry decisions.

pub mod classify;

use thiserror::Error;

pub use classify::{CloseDisposition, ErrorClass, classify_close, classify_error};

use crate::ids::MessageId;
use crate::state::ConnectionState;

// ─────────────────────────────────────────────────────────────────────────────
// SessionError
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level error type for the session layer.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Transport failure (socket, HTTP, DNS, server-side 5xx).
    #[error("{operation} failed ({class}): {message}")]
    Transport {
        /// Operation that failed (e.g. `connect`, `create_session`).
        operation: &'static str,
        /// Classification of the failure.
        class: ErrorClass,
        /// Underlying error text.
        message: String,
    },

    /// Malformed frame or response body.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credentials rejected or tenant not permitted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Too many requests.
    #[error("rate limited: {message}")]
    RateLimit {
        /// Server-suggested wait in milliseconds.
        retry_after_ms: Option<u64>,
        /// Underlying error text.
        message: String,
    },

    /// Caller supplied invalid input or called in the wrong state.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A deadline elapsed.
    #[error("{kind} timed out after {timeout_ms}ms")]
    Timeout {
        /// Which deadline.
        kind: TimeoutKind,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// Configuration error that retrying cannot fix.
    #[error("unrecoverable configuration error: {0}")]
    Unrecoverable(String),

    /// The session was torn down while the operation was in flight.
    #[error("{0} cancelled: session torn down")]
    Cancelled(&'static str),
}

impl SessionError {
    /// Build a transport error classified from its message text.
    #[must_use]
    pub fn transport(operation: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        let class = classify_error(&message);
        Self::from_class(operation, class, message)
    }

    /// Build the error variant matching a known class.
    #[must_use]
    pub fn from_class(operation: &'static str, class: ErrorClass, message: impl Into<String>) -> Self {
        let message = message.into();
        match class {
            ErrorClass::Authentication => Self::Authentication(message),
            ErrorClass::Configuration => Self::Unrecoverable(message),
            ErrorClass::RateLimit => Self::RateLimit {
                retry_after_ms: None,
                message,
            },
            ErrorClass::Protocol => Self::Protocol(message),
            _ => Self::Transport {
                operation,
                class,
                message,
            },
        }
    }

    /// Classification for retry decisions.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Transport { class, .. } => *class,
            Self::Protocol(_) => ErrorClass::Protocol,
            Self::Authentication(_) => ErrorClass::Authentication,
            Self::RateLimit { .. } => ErrorClass::RateLimit,
            Self::Validation(_) | Self::Cancelled(_) => ErrorClass::Validation,
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Unrecoverable(_) => ErrorClass::Configuration,
        }
    }

    /// Whether the failed operation may be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Templated, user-presentable text. Never contains raw error detail.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation(v) => v.user_message(),
            Self::Timeout {
                kind: TimeoutKind::Message,
                ..
            } => "Your message could not be delivered. Tap to retry.",
            Self::Timeout {
                kind: TimeoutKind::Stream,
                ..
            } => "The response was interrupted. Please try again.",
            Self::Cancelled(_) => "The conversation was closed.",
            other => match other.class() {
                ErrorClass::Authentication => "We couldn't verify your access. Please reload and try again.",
                ErrorClass::Configuration => "This chat is not available right now.",
                ErrorClass::RateLimit => "You're sending messages too quickly. Please wait a moment.",
                ErrorClass::PlatformInitializing => "The assistant is starting up. Please wait a moment.",
                ErrorClass::Timeout => "The assistant is taking too long to respond. Please try again.",
                _ => "Connection problem. Trying to reconnect…",
            },
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

// ─────────────────────────────────────────────────────────────────────────────
// ValidationError
// ─────────────────────────────────────────────────────────────────────────────

/// Caller-facing validation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// No chat session has been initialized.
    #[error("no active session")]
    NoActiveSession,
    /// The connection cannot carry application frames yet.
    #[error("connection not ready (state: {0})")]
    NotReady(ConnectionState),
    /// Message content is empty or whitespace.
    #[error("message content is empty")]
    EmptyContent,
    /// Message content exceeds the configured maximum.
    #[error("message too long: {len} > {max} characters")]
    ContentTooLong {
        /// Actual length in characters.
        len: usize,
        /// Configured maximum.
        max: usize,
    },
    /// Sends are paused after a server rate-limit signal.
    #[error("rate limited for another {remaining_ms}ms")]
    RateLimited {
        /// Time until sends are accepted again.
        remaining_ms: u64,
    },
    /// No message with this id is tracked.
    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),
    /// A message with this id is already tracked.
    #[error("duplicate message id: {0}")]
    DuplicateMessage(MessageId),
    /// Only failed user messages can be retried.
    #[error("message {0} is not in a retryable state")]
    NotRetryable(MessageId),
    /// The lifecycle graph forbids this transition.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Message id.
        id: MessageId,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
    /// Required configuration value missing.
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),
}

impl ValidationError {
    /// Templated, user-presentable text.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NoActiveSession | Self::NotReady(_) => "Still connecting. Please wait a moment.",
            Self::EmptyContent => "Please enter a message.",
            Self::ContentTooLong { .. } => "Your message is too long.",
            Self::RateLimited { .. } => "You're sending messages too quickly. Please wait a moment.",
            Self::NotRetryable(_) | Self::UnknownMessage(_) => "That message can't be retried.",
            Self::DuplicateMessage(_) | Self::InvalidTransition { .. } | Self::MissingConfig(_) => {
                "Something went wrong. Please reload."
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TimeoutKind
// ─────────────────────────────────────────────────────────────────────────────

/// Which deadline elapsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Backend never signalled readiness.
    Ready,
    /// A sent message was never acknowledged.
    Message,
    /// A streamed response never completed.
    Stream,
    /// Socket handshake did not finish.
    Connect,
    /// HTTP request to a collaborator did not finish.
    Request,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Message => "message",
            Self::Stream => "stream",
            Self::Connect => "connect",
            Self::Request => "request",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn transport_classifies_message() {
        let err = SessionError::transport("connect", "Connection refused (os error 111)");
        assert_matches!(
            err,
            SessionError::Transport {
                class: ErrorClass::Network,
                ..
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn transport_maps_auth_to_authentication_variant() {
        let err = SessionError::transport("connect", "HTTP error: 401 Unauthorized");
        assert_matches!(err, SessionError::Authentication(_));
        assert!(!err.is_retryable());
    }

    #[test]
    fn from_class_configuration_is_unrecoverable() {
        let err = SessionError::from_class("connect", ErrorClass::Configuration, "tenant not found");
        assert_matches!(err, SessionError::Unrecoverable(_));
        assert!(err.class().is_unrecoverable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let err: SessionError = ValidationError::EmptyContent.into();
        assert_eq!(err.class(), ErrorClass::Validation);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "message content is empty");
    }

    #[test]
    fn timeout_display() {
        let err = SessionError::Timeout {
            kind: TimeoutKind::Ready,
            timeout_ms: 10_000,
        };
        assert_eq!(err.to_string(), "ready timed out after 10000ms");
        assert!(err.is_retryable());
    }

    #[test]
    fn user_messages_are_templated() {
        let err = SessionError::transport("connect", "secret internal detail 10.0.0.3");
        assert!(!err.user_message().contains("10.0.0.3"));
        let err = SessionError::Timeout {
            kind: TimeoutKind::Message,
            timeout_ms: 30_000,
        };
        assert!(err.user_message().contains("retry"));
    }

    #[test]
    fn content_too_long_display() {
        let err = ValidationError::ContentTooLong { len: 5000, max: 4000 };
        assert_eq!(err.to_string(), "message too long: 5000 > 4000 characters");
    }

    #[test]
    fn not_ready_display_includes_state() {
        let err = ValidationError::NotReady(ConnectionState::Reconnecting);
        assert!(err.to_string().contains("reconnecting"));
    }
}
