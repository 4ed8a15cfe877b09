//! Error classification.
//!
//! Three inputs are folded into one [`ErrorClass`] vocabulary:
//!
//! - free-form transport / server error strings ([`classify_error`])
//! - HTTP status codes from the session service ([`ErrorClass::from_status`])
//! - WebSocket close codes ([`classify_close`])
//!
//! The class decides retry policy: unrecoverable classes stop immediately,
//! recoverable ones back off with a class-specific floor.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// ErrorClass
// ─────────────────────────────────────────────────────────────────────────────

/// Classification used for retry and reconnection decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Invalid, expired, or missing credentials.
    Authentication,
    /// Tenant or client misconfiguration (unknown tenant, bad URL).
    Configuration,
    /// Too many requests or connections.
    RateLimit,
    /// Backend is still warming up.
    PlatformInitializing,
    /// Connectivity failure (refused, reset, DNS, abnormal close).
    Network,
    /// Server-side failure (5xx, internal error close).
    Server,
    /// Malformed frame or response body.
    Protocol,
    /// Caller supplied invalid input or called in the wrong state.
    Validation,
    /// A deadline elapsed.
    Timeout,
}

impl ErrorClass {
    /// Whether an operation failing with this class may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit
                | Self::PlatformInitializing
                | Self::Network
                | Self::Server
                | Self::Protocol
                | Self::Timeout
        )
    }

    /// Whether retrying can never succeed without outside intervention.
    #[must_use]
    pub fn is_unrecoverable(self) -> bool {
        matches!(self, Self::Authentication | Self::Configuration)
    }

    /// Minimum reconnection delay for this class, in milliseconds.
    #[must_use]
    pub fn reconnect_floor_ms(self) -> u64 {
        match self {
            Self::RateLimit => 5_000,
            Self::Server => 4_000,
            Self::Network => 3_000,
            Self::PlatformInitializing => 2_000,
            _ => 0,
        }
    }

    /// Classify an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Authentication,
            403 | 404 => Self::Configuration,
            408 => Self::Timeout,
            429 => Self::RateLimit,
            503 => Self::PlatformInitializing,
            500..=599 => Self::Server,
            _ => Self::Validation,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::RateLimit => "rate_limit",
            Self::PlatformInitializing => "platform_initializing",
            Self::Network => "network",
            Self::Server => "server",
            Self::Protocol => "protocol",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// String patterns
// ─────────────────────────────────────────────────────────────────────────────

struct ErrorPattern {
    check: fn(&str) -> bool,
    class: ErrorClass,
}

/// Known patterns, checked in order against the lowercased input.
fn patterns() -> &'static [ErrorPattern] {
    static PATTERNS: &[ErrorPattern] = &[
        // Authentication
        ErrorPattern {
            check: |s| s.contains("401") || s.contains("unauthorized"),
            class: ErrorClass::Authentication,
        },
        ErrorPattern {
            check: |s| s.contains("invalid") && s.contains("token"),
            class: ErrorClass::Authentication,
        },
        ErrorPattern {
            check: |s| s.contains("authentication"),
            class: ErrorClass::Authentication,
        },
        // Configuration
        ErrorPattern {
            check: |s| s.contains("tenant") && (s.contains("not found") || s.contains("invalid")),
            class: ErrorClass::Configuration,
        },
        ErrorPattern {
            check: |s| s.contains("403") || s.contains("forbidden"),
            class: ErrorClass::Configuration,
        },
        ErrorPattern {
            check: |s| s.contains("url") && s.contains("invalid"),
            class: ErrorClass::Configuration,
        },
        // Rate limiting
        ErrorPattern {
            check: |s| s.contains("429") || s.contains("too many requests"),
            class: ErrorClass::RateLimit,
        },
        ErrorPattern {
            check: |s| s.contains("rate") && s.contains("limit"),
            class: ErrorClass::RateLimit,
        },
        // Platform warm-up
        ErrorPattern {
            check: |s| s.contains("initializing") || s.contains("warming up") || s.contains("503"),
            class: ErrorClass::PlatformInitializing,
        },
        // Timeouts
        ErrorPattern {
            check: |s| s.contains("timed out") || s.contains("timeout"),
            class: ErrorClass::Timeout,
        },
        // Network
        ErrorPattern {
            check: |s| {
                s.contains("connection refused")
                    || s.contains("connection reset")
                    || s.contains("broken pipe")
                    || s.contains("dns")
                    || s.contains("econnrefused")
            },
            class: ErrorClass::Network,
        },
        ErrorPattern {
            check: |s| s.contains("network") || s.contains("io error"),
            class: ErrorClass::Network,
        },
        // Server
        ErrorPattern {
            check: |s| s.contains("500") || s.contains("502") || s.contains("504"),
            class: ErrorClass::Server,
        },
        ErrorPattern {
            check: |s| s.contains("internal") || s.contains("overloaded"),
            class: ErrorClass::Server,
        },
        // Protocol
        ErrorPattern {
            check: |s| s.contains("json") || s.contains("malformed") || s.contains("schema"),
            class: ErrorClass::Protocol,
        },
    ];
    PATTERNS
}

/// Classify a free-form error string.
///
/// Unmatched input is treated as [`ErrorClass::Network`]: an unknown
/// transport failure is worth another attempt.
#[must_use]
pub fn classify_error(error: &str) -> ErrorClass {
    let lower = error.to_lowercase();
    patterns()
        .iter()
        .find(|p| (p.check)(&lower))
        .map_or(ErrorClass::Network, |p| p.class)
}

// ─────────────────────────────────────────────────────────────────────────────
// Close codes
// ─────────────────────────────────────────────────────────────────────────────

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (server restart / navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// No close frame received.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Policy violation (used by some gateways for auth rejection).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Unexpected server condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
/// Server restarting.
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
/// Try again later.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
/// Backend platform still initializing.
pub const CLOSE_PLATFORM_INITIALIZING: u16 = 4000;
/// Authentication failed.
pub const CLOSE_AUTH_FAILED: u16 = 4001;
/// Tenant not permitted.
pub const CLOSE_TENANT_FORBIDDEN: u16 = 4003;
/// Tenant unknown or misconfigured.
pub const CLOSE_TENANT_NOT_FOUND: u16 = 4004;
/// Connection rate limit exceeded.
pub const CLOSE_RATE_LIMITED: u16 = 4029;
/// Backend temporarily unavailable.
pub const CLOSE_UNAVAILABLE: u16 = 4503;

/// What a close code means for the connection lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Explicit, normal closure: go to `Disconnected`, do not retry.
    Normal,
    /// Terminal failure: go to `Failed`, never retry.
    Terminal(ErrorClass),
    /// Transient failure: go to `Reconnecting` and back off.
    Retry(ErrorClass),
}

/// Classify a WebSocket close code (and reason text, consulted for 1013).
#[must_use]
pub fn classify_close(code: u16, reason: &str) -> CloseDisposition {
    match code {
        CLOSE_NORMAL => CloseDisposition::Normal,
        CLOSE_AUTH_FAILED | CLOSE_POLICY_VIOLATION => {
            CloseDisposition::Terminal(ErrorClass::Authentication)
        }
        CLOSE_TENANT_FORBIDDEN | CLOSE_TENANT_NOT_FOUND => {
            CloseDisposition::Terminal(ErrorClass::Configuration)
        }
        CLOSE_RATE_LIMITED => CloseDisposition::Retry(ErrorClass::RateLimit),
        CLOSE_TRY_AGAIN_LATER => {
            if classify_error(reason) == ErrorClass::RateLimit {
                CloseDisposition::Retry(ErrorClass::RateLimit)
            } else {
                CloseDisposition::Retry(ErrorClass::Server)
            }
        }
        CLOSE_PLATFORM_INITIALIZING | CLOSE_UNAVAILABLE => {
            CloseDisposition::Retry(ErrorClass::PlatformInitializing)
        }
        CLOSE_GOING_AWAY | CLOSE_INTERNAL_ERROR | CLOSE_SERVICE_RESTART => {
            CloseDisposition::Retry(ErrorClass::Server)
        }
        _ => CloseDisposition::Retry(ErrorClass::Network),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
