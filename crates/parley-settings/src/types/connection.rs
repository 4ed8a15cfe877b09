//! Transport endpoint, identity, heartbeat, and reconnection settings.

use parley_core::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Where and as whom to connect.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// WebSocket endpoint, without query parameters.
    pub url: String,
    /// Base URL of the HTTP session service and health probe.
    pub api_base_url: String,
    /// Tenant (bot deployment) identifier. Required to connect.
    pub tenant_id: String,
    /// Optional bearer token passed as a query parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Optional pre-assigned client identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Socket handshake timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Inbound silence after which the link is considered dead.
    pub heartbeat_timeout_ms: u64,
    /// Window within which an identical inbound event is dropped.
    pub dedup_window_ms: u64,
    /// Maximum number of fingerprints remembered for deduplication.
    pub dedup_capacity: usize,
    /// Outbound frame queue depth.
    pub outbound_buffer: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/chat".to_string(),
            api_base_url: "http://127.0.0.1:8000".to_string(),
            tenant_id: String::new(),
            token: None,
            client_id: None,
            connect_timeout_ms: 10_000,
            heartbeat_timeout_ms: 90_000,
            dedup_window_ms: 1000,
            dedup_capacity: 256,
            outbound_buffer: 256,
        }
    }
}

/// Reconnection backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Reconnect automatically after recoverable failures.
    pub enabled: bool,
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// Base delay for exponential backoff.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Symmetric jitter factor (0.0–1.0).
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            enabled: true,
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay_ms,
            max_delay_ms: retry.max_delay_ms,
            jitter_factor: retry.jitter_factor,
        }
    }
}

impl ReconnectSettings {
    /// Backoff parameters for the reconnection loop.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_factor: self.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_defaults() {
        let c = ConnectionSettings::default();
        assert!(c.tenant_id.is_empty());
        assert!(c.token.is_none());
        assert_eq!(c.dedup_window_ms, 1000);
        assert_eq!(c.dedup_capacity, 256);
        assert_eq!(c.heartbeat_timeout_ms, 90_000);
    }

    #[test]
    fn reconnect_defaults_match_retry_config() {
        let r = ReconnectSettings::default();
        assert!(r.enabled);
        assert_eq!(r.retry_config(), RetryConfig::default());
    }

    #[test]
    fn retry_config_clamps_jitter() {
        let r = ReconnectSettings {
            jitter_factor: 3.0,
            ..ReconnectSettings::default()
        };
        assert!((r.retry_config().jitter_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn token_omitted_when_absent() {
        let json = serde_json::to_value(ConnectionSettings::default()).unwrap();
        assert!(json.get("token").is_none());
        assert!(json.get("tenantId").is_some());
    }
}
