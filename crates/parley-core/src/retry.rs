//! Retry configuration and backoff calculation.
//!
//! Pure, sync-only building blocks shared by the reconnection loop and the
//! session-creation retry loop:
//!
//! - [`RetryConfig`]: retry parameters (max attempts, backoff, jitter)
//! - [`calculate_backoff_delay_with_random`]: exponential backoff with jitter
//! - [`reconnect_delay_ms`]: backoff plus the per-class floor and the cap
//! - [`parse_retry_after`]: parse a `Retry-After` header or frame value
//!
//! Callers supply the random value so the math stays deterministic in tests.

use serde::{Deserialize, Serialize};

use crate::errors::ErrorClass;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default maximum reconnection attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retry logic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of attempts before giving up (default: 10).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms (default: 1000).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms (default: 30000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}
fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Theoretical exponential delay: `base * 2^(attempt - 1)`, uncapped.
///
/// `attempt` is one-based; attempt 0 is treated as 1.
#[must_use]
pub fn exponential_delay_ms(attempt: u32, base_delay_ms: u64) -> u64 {
    let exp = attempt.saturating_sub(1).min(31);
    base_delay_ms.saturating_mul(1u64 << exp)
}

/// Calculate backoff delay with explicit randomness.
///
/// `random` should be a value in `[0.0, 1.0)` from a PRNG. The jitter is
/// symmetric: a factor of 0.2 maps `random` onto `[-20%, +20%]` of the
/// exponential value. The result is capped at `max_delay_ms`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn calculate_backoff_delay_with_random(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = exponential_delay_ms(attempt, base_delay_ms);

    // Jitter: (1 + (random * 2 - 1) * jitter_factor)
    let jitter = 1.0 + (random.clamp(0.0, 1.0) * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (exponential as f64) * jitter;

    (with_jitter.round().max(0.0) as u64).min(max_delay_ms)
}

/// Delay before reconnection attempt `attempt` after a failure of `class`.
///
/// Order of operations: exponential, jitter, class floor, cap.
#[must_use]
pub fn reconnect_delay_ms(config: &RetryConfig, attempt: u32, class: ErrorClass, random: f64) -> u64 {
    let jittered = calculate_backoff_delay_with_random(
        attempt,
        config.base_delay_ms,
        u64::MAX,
        config.jitter_factor,
        random,
    );
    jittered
        .max(class.reconnect_floor_ms())
        .min(config.max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry-After parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a `Retry-After` value into milliseconds.
///
/// Accepts integer or fractional seconds (`"5"`, `"1.5"`) or an HTTP-date.
/// Past dates yield `0`; anything else yields `None`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some((seconds * 1000.0).round() as u64);
        }
        return None;
    }
    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delay_ms = date.signed_duration_since(chrono::Utc::now()).num_milliseconds();
        return Some(u64::try_from(delay_ms).unwrap_or(0));
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
