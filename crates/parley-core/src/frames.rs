//! Outbound wire frames.
//!
//! Every frame is serialized as `{"type": "<name>", "data": {...}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChatId, MessageId};

/// Frames the client sends to the backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Subscribe the connection to a chat channel.
    JoinChat {
        /// Chat to join.
        chat_id: ChatId,
    },
    /// Unsubscribe from a chat channel.
    LeaveChat {
        /// Chat to leave.
        chat_id: ChatId,
    },
    /// The user started typing.
    TypingStart {
        /// Active chat, absent in degraded mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// The user stopped typing.
    TypingStop {
        /// Active chat, absent in degraded mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
    },
    /// Heartbeat reply echoing the ping's timestamp.
    Pong {
        /// Timestamp copied verbatim from the ping.
        timestamp: Value,
    },
    /// A user chat message.
    Message {
        /// Message text.
        content: String,
        /// Active chat, absent in degraded mode.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<ChatId>,
        /// Temporary id the server echoes back for reconciliation.
        client_message_id: MessageId,
    },
}

impl OutboundFrame {
    /// Wire name of the frame type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => "join_chat",
            Self::LeaveChat { .. } => "leave_chat",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::Pong { .. } => "pong",
            Self::Message { .. } => "message",
        }
    }

    /// Control frames may be sent before the connection is ready.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(self, Self::Pong { .. })
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
