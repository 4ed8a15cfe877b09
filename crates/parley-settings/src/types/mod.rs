//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production values, and every
//! section is `#[serde(default)]` so partial files are accepted.

mod connection;
mod session;

pub use connection::*;
pub use session::*;

use serde::{Deserialize, Serialize};

/// Root settings type for Parley.
///
/// Loaded from `~/.parley/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "connection": { "url": "wss://chat.example.com/ws", "tenantId": "acme" },
///   "session": { "allowDegraded": false }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Transport endpoint and identity.
    pub connection: ConnectionSettings,
    /// Reconnection backoff.
    pub reconnect: ReconnectSettings,
    /// Session lifecycle, timeouts, and limits.
    pub session: SessionSettings,
    /// Streamed response assembly.
    pub stream: StreamSettings,
    /// Typing signal throttling.
    pub typing: TypingSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ParleySettings {
    fn default() -> Self {
        Self {
            version: parley_core::constants::VERSION.to_string(),
            name: parley_core::constants::NAME.to_string(),
            connection: ConnectionSettings::default(),
            reconnect: ReconnectSettings::default(),
            session: SessionSettings::default(),
            stream: StreamSettings::default(),
            typing: TypingSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose.
    Trace,
    /// Debug-level.
    Debug,
    /// Info-level.
    Info,
    /// Warning-level (default).
    #[default]
    Warn,
    /// Error-level.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level written to stderr.
    pub level: LogLevel,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}
