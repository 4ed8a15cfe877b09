//! Inbound event handling.

use std::time::Duration;

use parley_core::errors::classify_error;
use parley_core::events::{InboundEnvelope, SessionEvent};
use parley_core::ids::MessageId;
use parley_core::{SessionError, TimeoutKind};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Inner, SessionUpdate, millis};
use crate::registry::{LifecycleState, MessageContext};
use crate::stream::StreamUpdate;

impl Inner {
    pub(super) fn on_event(&self, envelope: &InboundEnvelope) {
        if let (Some(event_chat), Some(active)) = (&envelope.chat_id, self.active_chat_id()) {
            if *event_chat != active {
                debug!(
                    event = envelope.event.name(),
                    chat_id = %event_chat,
                    "ignoring event for inactive chat"
                );
                return;
            }
        }

        match &envelope.event {
            SessionEvent::InitializationProgress { phase, message } => {
                debug!(phase = %phase, "backend initializing");
                self.emit(SessionUpdate::Initialization {
                    phase: phase.clone(),
                    message: message.clone(),
                });
            }
            SessionEvent::ResponseStart { message_id } => {
                if !self.is_finished(message_id) {
                    let _ = self.streams.start(message_id);
                }
            }
            SessionEvent::ResponseChunk {
                message_id,
                content,
            } => {
                if self.is_finished(message_id) {
                    debug!(message_id = %message_id, "dropping fragment for finished response");
                } else {
                    self.streams.push_chunk(message_id, content);
                }
            }
            SessionEvent::ResponseComplete(payload) => {
                if self.is_finished(&payload.message_id) {
                    debug!(message_id = %payload.message_id, "duplicate completion");
                } else {
                    let _ = self.streams.complete(payload.clone());
                }
            }
            SessionEvent::MessageReceived {
                message_id,
                client_message_id,
                content,
            } => self.on_ack(message_id, client_message_id.as_ref(), content.as_deref()),
            SessionEvent::Processing { message_id } => match message_id {
                Some(id) => self.on_processing(id),
                None => debug!("processing without message id"),
            },
            SessionEvent::TypingIndicator { is_typing } => {
                self.emit(SessionUpdate::AssistantTyping(*is_typing));
            }
            SessionEvent::RateLimitExceeded { retry_after_ms } => {
                self.on_rate_limited(*retry_after_ms);
            }
            SessionEvent::Error {
                error_type,
                message,
                message_id,
            } => self.on_server_error(error_type, message, message_id.as_ref()),
            SessionEvent::ConnectionEstablished { .. }
            | SessionEvent::ConnectionReady
            | SessionEvent::Ping { .. } => {}
            SessionEvent::Other { event_type, .. } => {
                debug!(event = %event_type, "unhandled event");
            }
        }
    }

    /// Whether an assistant message already reached `Received`.
    fn is_finished(&self, message_id: &MessageId) -> bool {
        self.registry
            .lock()
            .get(message_id)
            .is_some_and(|e| e.state == LifecycleState::Received)
    }

    /// Correlate an acknowledgment: echoed temp id, then content, then the
    /// oldest unacknowledged message.
    fn on_ack(&self, server_id: &MessageId, client_id: Option<&MessageId>, content: Option<&str>) {
        let reconciled = {
            let mut registry = self.registry.lock();
            if registry.contains(server_id) {
                debug!(message_id = %server_id, "duplicate acknowledgment");
                return;
            }
            match client_id.filter(|id| registry.contains(id)) {
                Some(temp_id) => registry.reconcile_message(temp_id, server_id.clone(), None),
                None => content
                    .and_then(|text| {
                        registry.reconcile_by_content(
                            text,
                            server_id.clone(),
                            None,
                            self.config.reconcile_threshold,
                        )
                    })
                    .or_else(|| {
                        let temp_id = registry.oldest_in_flight()?.temp_id.clone();
                        registry.reconcile_message(&temp_id, server_id.clone(), None)
                    }),
            }
        };

        match reconciled {
            Some(entry) => {
                self.cancel_message_timer(&entry.temp_id);
                info!(temp_id = %entry.temp_id, message_id = %server_id, "message acknowledged");
                self.emit(SessionUpdate::MessageReconciled {
                    temp_id: entry.temp_id,
                    message: entry.message,
                });
            }
            None => debug!(message_id = %server_id, "acknowledgment matched no pending message"),
        }
    }

    fn on_processing(&self, id: &MessageId) {
        let updated = self
            .registry
            .lock()
            .update_message_state(id, LifecycleState::Delivered, None);
        match updated {
            Ok(entry) => {
                self.cancel_message_timer(&entry.temp_id);
                self.emit(SessionUpdate::MessageUpdated(entry.message));
            }
            Err(err) => debug!(message_id = %id, error = %err, "ignoring processing event"),
        }
    }

    fn on_rate_limited(&self, retry_after_ms: Option<u64>) {
        let pause = retry_after_ms.map_or(self.config.rate_limit_pause, Duration::from_millis);
        self.state.lock().rate_limited_until = Some(Instant::now() + pause);
        warn!(retry_after_ms = millis(pause), "rate limited by server");
        self.emit(SessionUpdate::RateLimited {
            retry_after_ms: millis(pause),
        });
    }

    fn on_server_error(&self, error_type: &str, message: &str, message_id: Option<&MessageId>) {
        let class = classify_error(&format!("{error_type}: {message}"));
        warn!(
            error_type,
            error = message,
            message_id = ?message_id.map(MessageId::as_str),
            class = %class,
            "server reported error"
        );

        if let Some(id) = message_id {
            let tracked = self.registry.lock().contains(id);
            if tracked {
                let _ = self.streams.discard(id);
                let _ = self.fail_message(id, error_type);
                return;
            }
        }
        let err = SessionError::from_class("server", class, message);
        self.emit(SessionUpdate::Error {
            class,
            message: err.user_message(),
        });
    }

    // ── Stream assembly output ───────────────────────────────────────────

    pub(super) fn on_stream_update(&self, update: StreamUpdate) {
        match update {
            StreamUpdate::Started(message) => {
                let context = MessageContext {
                    chat_id: self.active_chat_id(),
                };
                let added = {
                    let mut registry = self.registry.lock();
                    registry.register_message(message, context).and_then(|entry| {
                        registry.update_message_state(
                            &entry.temp_id,
                            LifecycleState::Streaming,
                            None,
                        )
                    })
                };
                match added {
                    Ok(entry) => self.emit(SessionUpdate::MessageAdded(entry.message)),
                    Err(err) => debug!(error = %err, "cannot track streamed message"),
                }
            }
            StreamUpdate::Delta {
                message_id,
                content,
            } => {
                let _ = self.registry.lock().set_content(&message_id, content.clone());
                self.emit(SessionUpdate::StreamDelta {
                    message_id,
                    content,
                });
            }
            StreamUpdate::Completed(message) => {
                let context = MessageContext {
                    chat_id: self.active_chat_id(),
                };
                let finished = {
                    let mut registry = self.registry.lock();
                    if let Some(entry) = registry.get(&message.id) {
                        if entry.state == LifecycleState::Received {
                            return;
                        }
                    } else if let Err(err) = registry.register_message(message.clone(), context) {
                        debug!(error = %err, "cannot track completed message");
                        return;
                    }
                    let _ = registry.set_content(&message.id, message.content.clone());
                    registry.update_message_state(
                        &message.id,
                        LifecycleState::Received,
                        Some(message.metadata.clone()),
                    )
                };
                match finished {
                    Ok(entry) => self.emit(SessionUpdate::MessageUpdated(entry.message)),
                    Err(err) => debug!(message_id = %message.id, error = %err, "ignoring completion"),
                }
            }
            StreamUpdate::TimedOut(message) => {
                let failed = {
                    let mut registry = self.registry.lock();
                    let _ = registry.set_content(&message.id, message.content.clone());
                    registry.update_message_state(
                        &message.id,
                        LifecycleState::Failed,
                        Some(message.metadata.clone()),
                    )
                };
                if let Ok(entry) = failed {
                    self.emit(SessionUpdate::MessageUpdated(entry.message));
                }
                let err = SessionError::Timeout {
                    kind: TimeoutKind::Stream,
                    timeout_ms: millis(self.config.stream.timeout),
                };
                self.emit(SessionUpdate::Error {
                    class: err.class(),
                    message: err.user_message(),
                });
            }
        }
    }
}
