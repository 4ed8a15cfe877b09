//! Message lifecycle tracking.
//!
//! User drafts are registered under a temporary id and later reconciled with
//! the id the server assigns. Reconciliation happens at most once per entry;
//! afterwards the entry answers to both ids.
//!
//! ```text
//! user:      Created → Sending → {Sent | Failed} → {Delivered | Received} → Reconciled
//! assistant: Created → Streaming → {Received | Failed}
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parley_core::ids::{ChatId, MessageId};
use parley_core::messages::{Message, MessageMetadata, MessageStatus, Role};
use parley_core::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Position of a tracked message in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Registered, nothing transmitted yet.
    Created,
    /// Transmitted, awaiting acknowledgment.
    Sending,
    /// Acknowledged.
    Sent,
    /// Server is processing it.
    Delivered,
    /// Assistant response arriving.
    Streaming,
    /// Assistant response complete.
    Received,
    /// Timed out or rejected.
    Failed,
    /// Temporary id replaced by the server id.
    Reconciled,
}

impl LifecycleState {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::{
            Created, Delivered, Failed, Received, Reconciled, Sending, Sent, Streaming,
        };
        matches!(
            (self, next),
            (Created, Sending | Streaming | Received | Failed)
                | (Sending, Sent | Failed | Delivered | Reconciled)
                | (Sent, Delivered | Received | Reconciled | Failed)
                | (Delivered | Reconciled, Received)
                | (Delivered, Reconciled)
                | (Reconciled, Delivered)
                | (Failed, Delivered | Received | Reconciled)
                | (Streaming, Received | Failed)
                | (Received, Reconciled)
        )
    }

    /// Message status implied by entering this state.
    #[must_use]
    pub fn status(self) -> Option<MessageStatus> {
        match self {
            Self::Created | Self::Reconciled => None,
            Self::Sending => Some(MessageStatus::Sending),
            Self::Sent => Some(MessageStatus::Sent),
            Self::Delivered => Some(MessageStatus::Delivered),
            Self::Streaming => Some(MessageStatus::Streaming),
            Self::Received => Some(MessageStatus::Received),
            Self::Failed => Some(MessageStatus::Failed),
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Streaming => "streaming",
            Self::Received => "received",
            Self::Failed => "failed",
            Self::Reconciled => "reconciled",
        };
        f.write_str(s)
    }
}

/// One recorded lifecycle change.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    /// State left.
    pub from: LifecycleState,
    /// State entered.
    pub to: LifecycleState,
    /// When.
    pub at: DateTime<Utc>,
}

/// Where a message was sent.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MessageContext {
    /// Chat the message belongs to.
    pub chat_id: Option<ChatId>,
}

/// A tracked message.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistryEntry {
    /// Current message; `message.id` becomes the server id on reconciliation.
    pub message: Message,
    /// Id the message was registered under (temporary for user drafts).
    pub temp_id: MessageId,
    /// Server id, once reconciled.
    pub server_id: Option<MessageId>,
    /// Lifecycle position.
    pub state: LifecycleState,
    /// Every transition so far.
    pub history: Vec<Transition>,
    /// Registration time.
    pub registered_at: DateTime<Utc>,
    /// Routing context.
    pub context: MessageContext,
}

impl RegistryEntry {
    /// Whether a server id has been assigned.
    pub fn is_reconciled(&self) -> bool {
        self.server_id.is_some()
    }

    fn enter(&mut self, next: LifecycleState) {
        self.history.push(Transition {
            from: self.state,
            to: next,
            at: Utc::now(),
        });
        self.state = next;
        if let Some(status) = next.status() {
            self.message.status = status;
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MessageRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered store of tracked messages.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    entries: HashMap<MessageId, RegistryEntry>,
    /// Server id → registration id.
    aliases: HashMap<MessageId, MessageId>,
    order: Vec<MessageId>,
}

impl MessageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `draft`. A blank id is replaced with a fresh temporary one.
    pub fn register_message(
        &mut self,
        mut draft: Message,
        context: MessageContext,
    ) -> Result<RegistryEntry> {
        if draft.id.trim().is_empty() {
            draft.id = MessageId::temporary();
        }
        if self.resolve(&draft.id).is_some() {
            return Err(ValidationError::DuplicateMessage(draft.id).into());
        }

        let entry = RegistryEntry {
            temp_id: draft.id.clone(),
            server_id: None,
            state: LifecycleState::Created,
            history: Vec::new(),
            registered_at: Utc::now(),
            context,
            message: draft,
        };
        debug!(message_id = %entry.temp_id, role = ?entry.message.role, "message registered");
        self.order.push(entry.temp_id.clone());
        let _ = self.entries.insert(entry.temp_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Move a message to `next`, merging `metadata` if given.
    ///
    /// Re-entering the current state only merges metadata.
    pub fn update_message_state(
        &mut self,
        id: &MessageId,
        next: LifecycleState,
        metadata: Option<MessageMetadata>,
    ) -> Result<RegistryEntry> {
        let key = self
            .resolve(id)
            .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
        let Some(entry) = self.entries.get_mut(&key) else {
            return Err(ValidationError::UnknownMessage(id.clone()).into());
        };

        if entry.state != next {
            if !entry.state.can_transition_to(next) {
                warn!(message_id = %id, from = %entry.state, to = %next, "invalid message transition");
                return Err(ValidationError::InvalidTransition {
                    id: id.clone(),
                    from: entry.state.to_string(),
                    to: next.to_string(),
                }
                .into());
            }
            entry.enter(next);
        }
        if let Some(metadata) = metadata {
            entry.message.metadata.merge(metadata);
        }
        Ok(entry.clone())
    }

    /// Replace a message's content. Returns whether it was tracked.
    pub fn set_content(&mut self, id: &MessageId, content: impl Into<String>) -> bool {
        match self.get_mut(id) {
            Some(entry) => {
                entry.message.content = content.into();
                true
            }
            None => false,
        }
    }

    /// Assign `server_id` to the draft registered as `temp_id`.
    ///
    /// Returns `None` when `temp_id` is unknown, already reconciled, or
    /// `server_id` already belongs to another entry.
    pub fn reconcile_message(
        &mut self,
        temp_id: &MessageId,
        server_id: MessageId,
        payload: Option<MessageMetadata>,
    ) -> Option<RegistryEntry> {
        if self.aliases.contains_key(&server_id) || self.entries.contains_key(&server_id) {
            return None;
        }
        let entry = self.entries.get_mut(temp_id)?;
        if entry.is_reconciled() {
            return None;
        }

        entry.server_id = Some(server_id.clone());
        entry.message.id = server_id.clone();
        if matches!(
            entry.message.status,
            MessageStatus::Sending | MessageStatus::Failed
        ) {
            entry.message.status = MessageStatus::Sent;
            entry.message.metadata.failure_reason = None;
        }
        if let Some(payload) = payload {
            entry.message.metadata.merge(payload);
        }
        if entry.state.can_transition_to(LifecycleState::Reconciled) {
            entry.enter(LifecycleState::Reconciled);
        }
        let _ = self.aliases.insert(server_id.clone(), temp_id.clone());

        debug!(temp_id = %temp_id, server_id = %server_id, "message reconciled");
        Some(entry.clone())
    }

    /// Reconcile the most recent unreconciled user draft whose content is
    /// at least `threshold` similar to `content`.
    pub fn reconcile_by_content(
        &mut self,
        content: &str,
        server_id: MessageId,
        payload: Option<MessageMetadata>,
        threshold: f64,
    ) -> Option<RegistryEntry> {
        let key = self
            .order
            .iter()
            .rev()
            .filter_map(|k| self.entries.get(k))
            .find(|e| {
                e.message.role == Role::User
                    && !e.is_reconciled()
                    && similarity(content, &e.message.content) >= threshold
            })
            .map(|e| e.temp_id.clone())?;
        self.reconcile_message(&key, server_id, payload)
    }

    /// Stop tracking a message, by either id.
    pub fn remove(&mut self, id: &MessageId) -> Option<RegistryEntry> {
        let key = self.resolve(id)?;
        let entry = self.entries.remove(&key)?;
        if let Some(server_id) = &entry.server_id {
            let _ = self.aliases.remove(server_id);
        }
        self.order.retain(|k| k != &key);
        Some(entry)
    }

    /// Look up by temporary or server id.
    pub fn get(&self, id: &MessageId) -> Option<&RegistryEntry> {
        self.entries.get(&self.resolve(id)?)
    }

    fn get_mut(&mut self, id: &MessageId) -> Option<&mut RegistryEntry> {
        let key = self.resolve(id)?;
        self.entries.get_mut(&key)
    }

    /// Whether either id is tracked.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.resolve(id).is_some()
    }

    /// Messages in registration order.
    pub fn messages(&self) -> Vec<Message> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .map(|e| e.message.clone())
            .collect()
    }

    /// Oldest user draft still awaiting acknowledgment.
    pub fn oldest_in_flight(&self) -> Option<&RegistryEntry> {
        self.order
            .iter()
            .filter_map(|k| self.entries.get(k))
            .find(|e| {
                e.message.role == Role::User
                    && !e.is_reconciled()
                    && e.state == LifecycleState::Sending
            })
    }

    /// Number of tracked messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.aliases.clear();
        self.order.clear();
    }

    fn resolve(&self, id: &MessageId) -> Option<MessageId> {
        if self.entries.contains_key(id) {
            return Some(id.clone());
        }
        self.aliases.get(id).cloned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Similarity
// ─────────────────────────────────────────────────────────────────────────────

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Content similarity in `[0, 1]`.
///
/// Texts equal after whitespace and case normalization score 1.0; otherwise
/// the Sørensen–Dice coefficient over character bigrams.
#[allow(clippy::cast_precision_loss)]
pub fn similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a == b {
        return 1.0;
    }
    let (a, b): (Vec<char>, Vec<char>) = (a.chars().collect(), b.chars().collect());
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut bigrams: HashMap<(char, char), usize> = HashMap::new();
    for pair in a.windows(2) {
        *bigrams.entry((pair[0], pair[1])).or_default() += 1;
    }
    let mut shared = 0usize;
    for pair in b.windows(2) {
        if let Some(count) = bigrams.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }
    let total = (a.len() - 1) + (b.len() - 1);
    (2 * shared) as f64 / total as f64
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parley_core::SessionError;
    use proptest::prelude::*;

    fn ctx() -> MessageContext {
        MessageContext {
            chat_id: Some(ChatId::from("c1")),
        }
    }

    fn sending(reg: &mut MessageRegistry, content: &str) -> MessageId {
        let entry = reg.register_message(Message::user(content), ctx()).unwrap();
        let _ = reg
            .update_message_state(&entry.temp_id, LifecycleState::Sending, None)
            .unwrap();
        entry.temp_id
    }

    #[test]
    fn lifecycle_graph() {
        use LifecycleState::*;
        assert!(Created.can_transition_to(Sending));
        assert!(Created.can_transition_to(Streaming));
        assert!(Sending.can_transition_to(Failed));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Reconciled.can_transition_to(Delivered));
        assert!(Streaming.can_transition_to(Received));
        assert!(!Streaming.can_transition_to(Sending));
        assert!(!Received.can_transition_to(Sending));
        assert!(!Sent.can_transition_to(Sending));
        assert!(!Created.can_transition_to(Reconciled));
    }

    #[test]
    fn register_assigns_temp_id_when_blank() {
        let mut reg = MessageRegistry::new();
        let mut draft = Message::user("hi");
        draft.id = MessageId::from("");
        let entry = reg.register_message(draft, ctx()).unwrap();
        assert!(entry.temp_id.is_temporary());
        assert_eq!(entry.state, LifecycleState::Created);
        assert_eq!(entry.context.chat_id.as_deref(), Some("c1"));
    }

    #[test]
    fn duplicate_registration_rejected() {
        let mut reg = MessageRegistry::new();
        let draft = Message::user("hi");
        let _ = reg.register_message(draft.clone(), ctx()).unwrap();
        let err = reg.register_message(draft, ctx()).unwrap_err();
        assert_matches!(
            err,
            SessionError::Validation(ValidationError::DuplicateMessage(_))
        );
    }

    #[test]
    fn update_records_history_and_status() {
        let mut reg = MessageRegistry::new();
        let id = sending(&mut reg, "hi");
        let entry = reg
            .update_message_state(
                &id,
                LifecycleState::Failed,
                Some(MessageMetadata::failure("timed out")),
            )
            .unwrap();
        assert_eq!(entry.message.status, MessageStatus::Failed);
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[1].from, LifecycleState::Sending);
        assert_eq!(
            entry.message.metadata.failure_reason.as_deref(),
            Some("timed out")
        );
    }

    #[test]
    fn same_state_update_is_noop() {
        let mut reg = MessageRegistry::new();
        let id = sending(&mut reg, "hi");
        let entry = reg
            .update_message_state(&id, LifecycleState::Sending, None)
            .unwrap();
        assert_eq!(entry.history.len(), 1);
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut reg = MessageRegistry::new();
        let id = sending(&mut reg, "hi");
        let err = reg
            .update_message_state(&id, LifecycleState::Streaming, None)
            .unwrap_err();
        assert_matches!(
            err,
            SessionError::Validation(ValidationError::InvalidTransition { .. })
        );
        assert_eq!(reg.get(&id).unwrap().state, LifecycleState::Sending);
    }

    #[test]
    fn unknown_message_update_rejected() {
        let mut reg = MessageRegistry::new();
        let err = reg
            .update_message_state(&MessageId::from("nope"), LifecycleState::Sent, None)
            .unwrap_err();
        assert_matches!(
            err,
            SessionError::Validation(ValidationError::UnknownMessage(_))
        );
    }

    #[test]
    fn reconcile_is_exactly_once() {
        let mut reg = MessageRegistry::new();
        let temp = sending(&mut reg, "hello");
        let entry = reg
            .reconcile_message(&temp, MessageId::from("srv-1"), None)
            .unwrap();
        assert_eq!(entry.message.id.as_str(), "srv-1");
        assert_eq!(entry.message.status, MessageStatus::Sent);
        assert_eq!(entry.state, LifecycleState::Reconciled);

        assert!(
            reg.reconcile_message(&temp, MessageId::from("srv-2"), None)
                .is_none()
        );
        assert_eq!(reg.get(&temp).unwrap().message.id.as_str(), "srv-1");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn server_id_cannot_be_reused() {
        let mut reg = MessageRegistry::new();
        let a = sending(&mut reg, "one");
        let b = sending(&mut reg, "two");
        assert!(reg.reconcile_message(&a, MessageId::from("srv"), None).is_some());
        assert!(reg.reconcile_message(&b, MessageId::from("srv"), None).is_none());
        assert!(!reg.get(&b).unwrap().is_reconciled());
    }

    #[test]
    fn lookup_by_either_id() {
        let mut reg = MessageRegistry::new();
        let temp = sending(&mut reg, "hello");
        let _ = reg.reconcile_message(&temp, MessageId::from("srv-1"), None);
        let by_server = reg.get(&MessageId::from("srv-1")).unwrap();
        assert_eq!(by_server.temp_id, temp);

        let entry = reg
            .update_message_state(&MessageId::from("srv-1"), LifecycleState::Delivered, None)
            .unwrap();
        assert_eq!(entry.message.status, MessageStatus::Delivered);
    }

    #[test]
    fn late_ack_revives_failed_message() {
        let mut reg = MessageRegistry::new();
        let temp = sending(&mut reg, "hello");
        let _ = reg.update_message_state(
            &temp,
            LifecycleState::Failed,
            Some(MessageMetadata::failure("timeout")),
        );
        let entry = reg
            .reconcile_message(&temp, MessageId::from("srv-1"), None)
            .unwrap();
        assert_eq!(entry.message.status, MessageStatus::Sent);
        assert!(entry.message.metadata.failure_reason.is_none());
    }

    #[test]
    fn reconcile_by_content_prefers_most_recent() {
        let mut reg = MessageRegistry::new();
        let first = sending(&mut reg, "What are your hours?");
        let second = sending(&mut reg, "what are your   hours?");
        let entry = reg
            .reconcile_by_content("What are your hours?", MessageId::from("srv"), None, 0.7)
            .unwrap();
        assert_eq!(entry.temp_id, second);
        assert!(!reg.get(&first).unwrap().is_reconciled());
    }

    #[test]
    fn reconcile_by_content_respects_threshold() {
        let mut reg = MessageRegistry::new();
        let _ = sending(&mut reg, "What are your hours?");
        assert!(
            reg.reconcile_by_content("Do you ship abroad?", MessageId::from("srv"), None, 0.7)
                .is_none()
        );
    }

    #[test]
    fn reconcile_by_content_skips_assistant_messages() {
        let mut reg = MessageRegistry::new();
        let reply = Message::assistant(MessageId::from("a1"), "hello", MessageStatus::Streaming);
        let _ = reg.register_message(reply, ctx()).unwrap();
        assert!(
            reg.reconcile_by_content("hello", MessageId::from("srv"), None, 0.7)
                .is_none()
        );
    }

    #[test]
    fn oldest_in_flight_is_first_unacknowledged() {
        let mut reg = MessageRegistry::new();
        let a = sending(&mut reg, "one");
        let b = sending(&mut reg, "two");
        assert_eq!(reg.oldest_in_flight().unwrap().temp_id, a);
        let _ = reg.reconcile_message(&a, MessageId::from("s1"), None);
        assert_eq!(reg.oldest_in_flight().unwrap().temp_id, b);
    }

    #[test]
    fn remove_by_server_id() {
        let mut reg = MessageRegistry::new();
        let temp = sending(&mut reg, "hello");
        let _ = reg.reconcile_message(&temp, MessageId::from("srv"), None);
        assert!(reg.remove(&MessageId::from("srv")).is_some());
        assert!(reg.is_empty());
        assert!(!reg.contains(&temp));
        assert!(reg.messages().is_empty());
    }

    #[test]
    fn messages_in_registration_order() {
        let mut reg = MessageRegistry::new();
        let _ = sending(&mut reg, "one");
        let _ = sending(&mut reg, "two");
        let contents: Vec<String> = reg.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["one", "two"]);
        reg.clear();
        assert!(reg.is_empty());
    }

    #[test]
    fn similarity_values() {
        assert!((similarity("Hello  World", "hello world") - 1.0).abs() < f64::EPSILON);
        assert!((similarity("night", "nacht") - 0.25).abs() < 1e-9);
        assert!(similarity("a", "b").abs() < f64::EPSILON);
        assert!(similarity("what are your hours", "what are your hours?") > 0.9);
    }

    proptest! {
        #[test]
        fn similarity_is_bounded_and_symmetric(a in ".{0,40}", b in ".{0,40}") {
            let ab = similarity(&a, &b);
            let ba = similarity(&b, &a);
            prop_assert!((0.0..=1.0).contains(&ab));
            prop_assert!((ab - ba).abs() < 1e-9);
        }
    }
}
