//! Session lifecycle, stream assembly, and typing throttle settings.

use serde::{Deserialize, Serialize};

/// Session lifecycle timeouts and limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Time allowed between socket open and the backend's ready frame.
    pub ready_timeout_ms: u64,
    /// Time allowed for a user message to be acknowledged.
    pub message_timeout_ms: u64,
    /// Maximum message length in characters.
    pub max_message_length: usize,
    /// Health probe attempts before giving up on backend readiness.
    pub health_check_attempts: u32,
    /// Fixed delay between health probe attempts.
    pub health_check_delay_ms: u64,
    /// Attempts at creating the chat session.
    pub create_session_retries: u32,
    /// Base delay between session creation attempts.
    pub create_session_delay_ms: u64,
    /// Connect without a chat id when session creation keeps failing.
    pub allow_degraded: bool,
    /// Timeout for each HTTP request to the session service.
    pub request_timeout_ms: u64,
    /// Minimum similarity for content-based acknowledgment matching.
    pub reconcile_threshold: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 10_000,
            message_timeout_ms: 30_000,
            max_message_length: 4000,
            health_check_attempts: 5,
            health_check_delay_ms: 1000,
            create_session_retries: 3,
            create_session_delay_ms: 1000,
            allow_degraded: true,
            request_timeout_ms: 10_000,
            reconcile_threshold: 0.7,
        }
    }
}

/// Streamed response assembly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// A stream with no completion after this long is failed.
    pub timeout_ms: u64,
    /// Window over which chunk updates are batched.
    pub debounce_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            debounce_ms: 30,
        }
    }
}

/// Typing signal throttling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypingSettings {
    /// Minimum interval between two `typing_start` signals.
    pub min_start_interval_ms: u64,
    /// Minimum interval between two `typing_stop` signals.
    pub min_stop_interval_ms: u64,
    /// Inactivity after which `typing_stop` is sent automatically.
    pub stop_delay_ms: u64,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            min_start_interval_ms: 2000,
            min_stop_interval_ms: 1000,
            stop_delay_ms: 2000,
        }
    }
}
