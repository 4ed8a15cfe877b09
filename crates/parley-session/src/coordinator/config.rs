//! Coordinator configuration.

use std::time::Duration;

use parley_core::ids::TenantId;
use parley_settings::ParleySettings;

use crate::stream::StreamConfig;
use crate::typing::TypingConfig;

/// Rate-limit pause applied when the server gives no `retry_after`.
pub const DEFAULT_RATE_LIMIT_PAUSE: Duration = Duration::from_secs(5);

/// Configuration for a [`SessionCoordinator`](super::SessionCoordinator).
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Tenant every session belongs to.
    pub tenant_id: TenantId,
    /// How long to wait for the backend's ready frame after connecting.
    pub ready_timeout: Duration,
    /// How long a sent message may wait for acknowledgment.
    pub message_timeout: Duration,
    /// Longest accepted message, in characters.
    pub max_message_length: usize,
    /// Readiness probe attempts before proceeding anyway.
    pub health_check_attempts: u32,
    /// Delay between readiness probe attempts.
    pub health_check_delay: Duration,
    /// Total session creation attempts for retryable failures.
    pub create_session_attempts: u32,
    /// Base delay between creation attempts, doubled per attempt.
    pub create_session_delay: Duration,
    /// Continue without a chat id when creation keeps failing.
    pub allow_degraded: bool,
    /// Minimum similarity for content-based reconciliation.
    pub reconcile_threshold: f64,
    /// Pause applied on a rate-limit signal without `retry_after`.
    pub rate_limit_pause: Duration,
    /// Capacity of the update broadcast channel.
    pub update_buffer: usize,
    /// Stream assembly timing.
    pub stream: StreamConfig,
    /// Typing throttle timing.
    pub typing: TypingConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tenant_id: TenantId::from(""),
            ready_timeout: Duration::from_secs(10),
            message_timeout: Duration::from_secs(30),
            max_message_length: 4000,
            health_check_attempts: 5,
            health_check_delay: Duration::from_secs(1),
            create_session_attempts: 3,
            create_session_delay: Duration::from_secs(1),
            allow_degraded: true,
            reconcile_threshold: 0.7,
            rate_limit_pause: DEFAULT_RATE_LIMIT_PAUSE,
            update_buffer: 256,
            stream: StreamConfig::default(),
            typing: TypingConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        let s = &settings.session;
        Self {
            tenant_id: TenantId::from(settings.connection.tenant_id.as_str()),
            ready_timeout: Duration::from_millis(s.ready_timeout_ms),
            message_timeout: Duration::from_millis(s.message_timeout_ms),
            max_message_length: s.max_message_length,
            health_check_attempts: s.health_check_attempts,
            health_check_delay: Duration::from_millis(s.health_check_delay_ms),
            create_session_attempts: s.create_session_retries.max(1),
            create_session_delay: Duration::from_millis(s.create_session_delay_ms),
            allow_degraded: s.allow_degraded,
            reconcile_threshold: s.reconcile_threshold,
            stream: StreamConfig::from(&settings.stream),
            typing: TypingConfig::from(&settings.typing),
            ..Self::default()
        }
    }
}
