//! Connection manager configuration.

use std::time::Duration;

use parley_core::ids::{ClientId, TenantId};
use parley_core::retry::RetryConfig;
use parley_settings::ParleySettings;

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// WebSocket endpoint without query parameters.
    pub url: String,
    /// Tenant the connection is bound to. Required.
    pub tenant_id: TenantId,
    /// Pre-assigned client id; the server assigns one when absent.
    pub client_id: Option<ClientId>,
    /// Bearer token passed as the `token` query parameter.
    pub token: Option<String>,
    /// Socket handshake timeout.
    pub connect_timeout: Duration,
    /// Inbound silence after which the link is treated as dead.
    pub heartbeat_timeout: Duration,
    /// Window for dropping repeated inbound events.
    pub dedup_window: Duration,
    /// Fingerprints remembered for deduplication.
    pub dedup_capacity: usize,
    /// Outbound frame queue depth.
    pub outbound_buffer: usize,
    /// Whether recoverable failures schedule reconnection.
    pub reconnect_enabled: bool,
    /// Reconnection backoff.
    pub reconnect: RetryConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws/chat".to_string(),
            tenant_id: TenantId::from(""),
            client_id: None,
            token: None,
            connect_timeout: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(90),
            dedup_window: Duration::from_secs(1),
            dedup_capacity: 256,
            outbound_buffer: 256,
            reconnect_enabled: true,
            reconnect: RetryConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        let c = &settings.connection;
        Self {
            url: c.url.clone(),
            tenant_id: TenantId::from(c.tenant_id.as_str()),
            client_id: c.client_id.as_deref().map(ClientId::from),
            token: c.token.clone(),
            connect_timeout: Duration::from_millis(c.connect_timeout_ms),
            heartbeat_timeout: Duration::from_millis(c.heartbeat_timeout_ms),
            dedup_window: Duration::from_millis(c.dedup_window_ms),
            dedup_capacity: c.dedup_capacity.max(1),
            outbound_buffer: c.outbound_buffer.max(1),
            reconnect_enabled: settings.reconnect.enabled,
            reconnect: settings.reconnect.retry_config(),
        }
    }
}
