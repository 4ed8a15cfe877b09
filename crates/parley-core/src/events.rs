//! Canonical inbound events.
//!
//! The wire carries many spellings for the same concept. Normalization
//! collapses them into one [`SessionEvent`] per concept; everything past the
//! normalizer only ever sees these variants. [`EventKind`] is the closed set
//! listeners subscribe to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChatId, ClientId, MessageId, TenantId};
use crate::messages::MessageMetadata;

/// Closed set of event kinds listeners can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Socket accepted; server assigned identifiers.
    ConnectionEstablished,
    /// Backend accepts application messages.
    ConnectionReady,
    /// Backend warm-up progress.
    InitializationProgress,
    /// Assistant response stream opened.
    ResponseStart,
    /// Assistant response fragment.
    ResponseChunk,
    /// Assistant response finished.
    ResponseComplete,
    /// Server acknowledged a user message.
    MessageReceived,
    /// Server is working on a user message.
    Processing,
    /// Assistant typing indicator.
    TypingIndicator,
    /// Server asked the client to slow down.
    RateLimitExceeded,
    /// Server-reported error.
    Error,
    /// Application-level heartbeat.
    Ping,
    /// Any event type this client does not know.
    Other,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 13] = [
        Self::ConnectionEstablished,
        Self::ConnectionReady,
        Self::InitializationProgress,
        Self::ResponseStart,
        Self::ResponseChunk,
        Self::ResponseComplete,
        Self::MessageReceived,
        Self::Processing,
        Self::TypingIndicator,
        Self::RateLimitExceeded,
        Self::Error,
        Self::Ping,
        Self::Other,
    ];

    /// Canonical wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::ConnectionReady => "connection_ready",
            Self::InitializationProgress => "initialization_progress",
            Self::ResponseStart => "response_start",
            Self::ResponseChunk => "response_chunk",
            Self::ResponseComplete => "response_complete",
            Self::MessageReceived => "message_received",
            Self::Processing => "processing",
            Self::TypingIndicator => "typing_indicator",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::Error => "error",
            Self::Ping => "ping",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a completed assistant response.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseComplete {
    /// Server id of the assistant message.
    pub message_id: MessageId,
    /// Full content, when the server sends it.
    pub content: Option<String>,
    /// Final metadata.
    pub metadata: MessageMetadata,
}

/// A canonical inbound event.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Socket accepted.
    ConnectionEstablished {
        /// Server-assigned client id.
        client_id: Option<ClientId>,
        /// Tenant the server bound the connection to.
        tenant_id: Option<TenantId>,
    },
    /// Backend ready.
    ConnectionReady,
    /// Warm-up progress.
    InitializationProgress {
        /// Phase name.
        phase: String,
        /// Human-readable detail.
        message: Option<String>,
    },
    /// Response stream opened.
    ResponseStart {
        /// Assistant message id.
        message_id: MessageId,
    },
    /// Response fragment.
    ResponseChunk {
        /// Assistant message id.
        message_id: MessageId,
        /// Fragment text.
        content: String,
    },
    /// Response finished.
    ResponseComplete(ResponseComplete),
    /// User message acknowledged.
    MessageReceived {
        /// Server id assigned to the user message.
        message_id: MessageId,
        /// Temporary id echoed back, when the server supports it.
        client_message_id: Option<MessageId>,
        /// Content echoed back, used for fallback correlation.
        content: Option<String>,
    },
    /// User message being processed.
    Processing {
        /// Server or temporary id, when given.
        message_id: Option<MessageId>,
    },
    /// Assistant typing indicator.
    TypingIndicator {
        /// Whether the assistant is typing.
        is_typing: bool,
    },
    /// Slow down.
    RateLimitExceeded {
        /// Suggested wait.
        retry_after_ms: Option<u64>,
    },
    /// Server-reported error.
    Error {
        /// Error type tag.
        error_type: String,
        /// Error text (never shown verbatim to users).
        message: String,
        /// Affected message, when scoped to one.
        message_id: Option<MessageId>,
    },
    /// Heartbeat.
    Ping {
        /// Timestamp to echo in the pong.
        timestamp: Value,
    },
    /// Unrecognized event, dispatched under its own name.
    Other {
        /// Original wire type.
        event_type: String,
        /// Raw payload.
        data: Value,
    },
}

impl SessionEvent {
    /// Kind used for listener dispatch.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionEstablished { .. } => EventKind::ConnectionEstablished,
            Self::ConnectionReady => EventKind::ConnectionReady,
            Self::InitializationProgress { .. } => EventKind::InitializationProgress,
            Self::ResponseStart { .. } => EventKind::ResponseStart,
            Self::ResponseChunk { .. } => EventKind::ResponseChunk,
            Self::ResponseComplete(_) => EventKind::ResponseComplete,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::Processing { .. } => EventKind::Processing,
            Self::TypingIndicator { .. } => EventKind::TypingIndicator,
            Self::RateLimitExceeded { .. } => EventKind::RateLimitExceeded,
            Self::Error { .. } => EventKind::Error,
            Self::Ping { .. } => EventKind::Ping,
            Self::Other { .. } => EventKind::Other,
        }
    }

    /// Name the event is dispatched under: canonical for known kinds,
    /// the original wire type for unknown ones.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Other { event_type, .. } => event_type,
            other => other.kind().as_str(),
        }
    }

    /// Message the event refers to, if any.
    #[must_use]
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::ResponseStart { message_id }
            | Self::ResponseChunk { message_id, .. }
            | Self::MessageReceived { message_id, .. } => Some(message_id),
            Self::ResponseComplete(c) => Some(&c.message_id),
            Self::Processing { message_id } | Self::Error { message_id, .. } => message_id.as_ref(),
            _ => None,
        }
    }

    /// Text content carried by the event, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::ResponseChunk { content, .. } => Some(content),
            Self::ResponseComplete(c) => c.content.as_deref(),
            Self::MessageReceived { content, .. } => content.as_deref(),
            Self::Error { message, .. } => Some(message),
            Self::InitializationProgress { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

/// A normalized event plus the routing metadata the wire frame carried.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundEnvelope {
    /// Canonical event.
    pub event: SessionEvent,
    /// Type name exactly as received.
    pub wire_type: String,
    /// Chat the event belongs to.
    pub chat_id: Option<ChatId>,
    /// Server timestamp, stringified.
    pub timestamp: Option<String>,
    /// Chunk sequence number, when the server numbers fragments.
    pub sequence: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_canonical() {
        assert_eq!(EventKind::ResponseComplete.as_str(), "response_complete");
        assert_eq!(EventKind::RateLimitExceeded.to_string(), "rate_limit_exceeded");
    }

    #[test]
    fn other_events_use_their_own_name() {
        let event = SessionEvent::Other {
            event_type: "widget_update".into(),
            data: Value::Null,
        };
        assert_eq!(event.kind(), EventKind::Other);
        assert_eq!(event.name(), "widget_update");
    }

    #[test]
    fn message_id_accessor() {
        let event = SessionEvent::ResponseChunk {
            message_id: MessageId::from("m1"),
            content: "x".into(),
        };
        assert_eq!(event.message_id().map(MessageId::as_str), Some("m1"));
        assert_eq!(SessionEvent::ConnectionReady.message_id(), None);
    }

    #[test]
    fn content_accessor() {
        let event = SessionEvent::ResponseComplete(ResponseComplete {
            message_id: MessageId::from("m1"),
            content: None,
            metadata: MessageMetadata::default(),
        });
        assert_eq!(event.content(), None);
        assert_eq!(event.name(), "response_complete");
    }
}
