//! Chat message model as seen by the UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

/// Author of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Typed by the local user.
    User,
    /// Produced by the backend assistant.
    Assistant,
}

/// UI-visible delivery status of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Transmitted, waiting for the server to acknowledge.
    Sending,
    /// Acknowledged by the server.
    Sent,
    /// Server reports it is being processed.
    Delivered,
    /// Assistant response is arriving in fragments.
    Streaming,
    /// Assistant response complete.
    Received,
    /// Terminal failure; user messages may be retried.
    Failed,
}

impl MessageStatus {
    /// Whether no further status change is expected.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Received | Self::Failed)
    }
}

/// A retrieval source cited by an assistant response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Display title.
    #[serde(default)]
    pub title: Option<String>,
    /// Link target.
    #[serde(default)]
    pub url: Option<String>,
    /// Quoted excerpt.
    #[serde(default)]
    pub snippet: Option<String>,
}

/// Response metadata attached on completion.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Model that produced the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Total tokens consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    /// Estimated cost in USD.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
    /// Server-measured response time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    /// Cited sources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Why the message failed, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl MessageMetadata {
    /// Overlay every field set in `other` onto `self`.
    pub fn merge(&mut self, other: MessageMetadata) {
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        }
        if other.cost_estimate.is_some() {
            self.cost_estimate = other.cost_estimate;
        }
        if other.response_time_ms.is_some() {
            self.response_time_ms = other.response_time_ms;
        }
        if !other.sources.is_empty() {
            self.sources = other.sources;
        }
        if other.failure_reason.is_some() {
            self.failure_reason = other.failure_reason;
        }
    }

    /// Metadata carrying only a failure reason.
    #[must_use]
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// A chat message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Temporary until reconciled with the server.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text content; grows while streaming.
    pub content: String,
    /// Delivery status.
    pub status: MessageStatus,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Response metadata.
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl Message {
    /// A new outgoing user message with a temporary id.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::temporary(),
            role: Role::User,
            content: content.into(),
            status: MessageStatus::Sending,
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// A new assistant message with a server-assigned id.
    #[must_use]
    pub fn assistant(id: MessageId, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
            status,
            timestamp: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_starts_sending_with_temp_id() {
        let msg = Message::user("hello");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.status, MessageStatus::Sending);
        assert!(msg.id.is_temporary());
    }

    #[test]
    fn assistant_message_keeps_server_id() {
        let msg = Message::assistant(MessageId::from("srv-1"), "", MessageStatus::Streaming);
        assert_eq!(msg.id.as_str(), "srv-1");
        assert!(!msg.id.is_temporary());
    }

    #[test]
    fn metadata_merge_overlays_set_fields() {
        let mut base = MessageMetadata {
            model: Some("a".into()),
            total_tokens: Some(10),
            ..MessageMetadata::default()
        };
        base.merge(MessageMetadata {
            total_tokens: Some(42),
            cost_estimate: Some(0.01),
            ..MessageMetadata::default()
        });
        assert_eq!(base.model.as_deref(), Some("a"));
        assert_eq!(base.total_tokens, Some(42));
        assert_eq!(base.cost_estimate, Some(0.01));
    }

    #[test]
    fn terminal_statuses() {
        assert!(MessageStatus::Sent.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Sending.is_terminal());
        assert!(!MessageStatus::Streaming.is_terminal());
    }

    #[test]
    fn metadata_skips_empty_fields() {
        let json = serde_json::to_value(MessageMetadata::failure("timeout")).unwrap();
        assert_eq!(json, serde_json::json!({"failure_reason": "timeout"}));
    }
}
