//! Values the coordinator accepts and publishes.

use chrono::{DateTime, Utc};
use parley_core::errors::ErrorClass;
use parley_core::ids::{ChatId, MessageId, TenantId, VisitorId};
use parley_core::messages::Message;
use parley_core::state::ConnectionState;
use serde::Serialize;

/// The active conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatSession {
    /// Chat id; `None` in degraded mode.
    pub chat_id: Option<ChatId>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// When the session was established.
    pub created_at: DateTime<Utc>,
    /// Whether session creation failed and the connection is tenant-only.
    pub degraded: bool,
}

/// Options for [`SessionCoordinator::initialize`](super::SessionCoordinator::initialize).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitializeOptions {
    /// Anonymous visitor identity; generated when absent.
    pub visitor_id: Option<VisitorId>,
    /// Client-side session identifier; generated when absent.
    pub session_id: Option<String>,
    /// Resume an existing chat instead of creating one.
    pub chat_id: Option<ChatId>,
}

/// Options for [`SessionCoordinator::send_message`](super::SessionCoordinator::send_message).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Use this temporary id instead of generating one.
    pub client_message_id: Option<MessageId>,
}

/// UI-visible change published by the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    /// Connection lifecycle moved.
    ConnectionState(ConnectionState),
    /// `initialize` completed.
    SessionStarted(ChatSession),
    /// Backend warm-up progress.
    Initialization {
        /// Phase name.
        phase: String,
        /// Detail text.
        message: Option<String>,
    },
    /// A message appeared (optimistic user message or new assistant stream).
    MessageAdded(Message),
    /// A message's status, content, or metadata changed.
    MessageUpdated(Message),
    /// A temporary id was replaced with the server id.
    MessageReconciled {
        /// Id the UI knew the message by.
        temp_id: MessageId,
        /// Message under its server id.
        message: Message,
    },
    /// A message was withdrawn (e.g. before a retry resends it).
    MessageRemoved(MessageId),
    /// Streamed content so far.
    StreamDelta {
        /// Assistant message id.
        message_id: MessageId,
        /// Full content so far.
        content: String,
    },
    /// Assistant typing indicator.
    AssistantTyping(bool),
    /// Sends are paused.
    RateLimited {
        /// Pause length.
        retry_after_ms: u64,
    },
    /// Something failed; `message` is safe to show.
    Error {
        /// Classification.
        class: ErrorClass,
        /// Templated user-facing text.
        message: &'static str,
    },
    /// The active chat changed.
    ChatSwitched {
        /// Previous chat.
        from: Option<ChatId>,
        /// New chat.
        to: ChatId,
    },
    /// The session was torn down.
    Disconnected,
}
