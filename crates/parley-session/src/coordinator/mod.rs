//! Top-level session orchestration.
//!
//! [`SessionCoordinator`] is what a UI talks to. It owns the connection
//! manager, message registry, stream assembler, and typing throttle, wires
//! inbound events between them, and publishes [`SessionUpdate`]s on a
//! broadcast channel.
//!
//! Teardown bumps a generation counter and fires a cancellation token. An
//! in-flight initialization resolves as cancelled as soon as the token fires;
//! message timers and inbound handlers compare generations before touching
//! state.

mod config;
mod inbound;
mod types;

pub use config::{CoordinatorConfig, DEFAULT_RATE_LIMIT_PAUSE};
pub use types::{ChatSession, InitializeOptions, SendOptions, SessionUpdate};

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use parley_core::events::{EventKind, InboundEnvelope};
use parley_core::frames::OutboundFrame;
use parley_core::ids::{ChatId, MessageId};
use parley_core::messages::{Message, MessageMetadata, MessageStatus, Role};
use parley_core::retry::exponential_delay_ms;
use parley_core::state::ConnectionState;
use parley_core::{Result, SessionError, TimeoutKind, ValidationError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collaborators::{CreateSessionRequest, HealthProbe, SessionService};
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionStats, EventHandler};
use crate::registry::{LifecycleState, MessageContext, MessageRegistry};
use crate::stream::{StreamAssembler, StreamSink};
use crate::typing::{TypingCallback, TypingStats, TypingThrottle};

type InitFuture = Shared<BoxFuture<'static, Result<ChatSession>>>;

#[derive(Default)]
struct CoordState {
    session: Option<ChatSession>,
    /// The session reached ready and initialization has finished with it.
    started: bool,
    generation: u64,
    teardown: CancellationToken,
    rate_limited_until: Option<Instant>,
    message_timers: HashMap<MessageId, JoinHandle<()>>,
}

struct Inner {
    config: CoordinatorConfig,
    connection: ConnectionManager,
    sessions: Arc<dyn SessionService>,
    health: Option<Arc<dyn HealthProbe>>,
    registry: Mutex<MessageRegistry>,
    streams: StreamAssembler,
    typing: TypingThrottle,
    state: Mutex<CoordState>,
    init: Mutex<Option<InitFuture>>,
    updates: broadcast::Sender<SessionUpdate>,
}

/// Orchestrates one chat session for a UI.
pub struct SessionCoordinator {
    inner: Arc<Inner>,
    forwarder: JoinHandle<()>,
}

impl SessionCoordinator {
    /// Build a coordinator. Must be called within a Tokio runtime.
    pub fn new(
        config: CoordinatorConfig,
        connection: ConnectionConfig,
        sessions: Arc<dyn SessionService>,
        health: Option<Arc<dyn HealthProbe>>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let connection = ConnectionManager::new(connection);
            let handler: EventHandler = {
                let weak = weak.clone();
                Arc::new(move |envelope: &InboundEnvelope| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_event(envelope);
                    }
                })
            };
            for kind in EventKind::ALL {
                let _ = connection.subscribe(kind, &handler);
            }

            let sink: StreamSink = {
                let weak = weak.clone();
                Arc::new(move |update| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_stream_update(update);
                    }
                })
            };
            let streams = StreamAssembler::new(config.stream, sink);
            let typing = TypingThrottle::new(
                config.typing,
                typing_callback(weak, true),
                typing_callback(weak, false),
            );
            let (updates, _) = broadcast::channel(config.update_buffer.max(1));

            Inner {
                config,
                connection,
                sessions,
                health,
                registry: Mutex::new(MessageRegistry::new()),
                streams,
                typing,
                state: Mutex::new(CoordState::default()),
                init: Mutex::new(None),
                updates,
            }
        });
        let forwarder = tokio::spawn(forward_connection_state(
            Arc::downgrade(&inner),
            inner.connection.state_changes(),
        ));
        Self { inner, forwarder }
    }

    /// Receive session updates.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.inner.updates.subscribe()
    }

    /// Establish the session: probe, create chat, connect, await readiness.
    ///
    /// Concurrent calls share one attempt. Once a session exists, further
    /// calls return it without doing anything, unless its connection has
    /// failed for good. `disconnect` cancels an attempt in flight.
    #[tracing::instrument(skip_all, fields(tenant_id = %self.inner.config.tenant_id))]
    pub async fn initialize(&self, options: InitializeOptions) -> Result<ChatSession> {
        let attempt = {
            let mut slot = self.inner.init.lock();
            let (session, generation, teardown) = {
                let s = self.inner.state.lock();
                (s.session.clone(), s.generation, s.teardown.clone())
            };
            if let Some(session) = session {
                if slot.is_none() && self.inner.connection.state() != ConnectionState::Failed {
                    return Ok(session);
                }
            }
            if let Some(pending) = slot.as_ref() {
                debug!("joining in-flight initialization");
                pending.clone()
            } else {
                let inner = Arc::clone(&self.inner);
                let attempt = async move {
                    tokio::select! {
                        () = teardown.cancelled() => Err(SessionError::Cancelled("initialize")),
                        result = inner.run_initialize(options, generation) => result,
                    }
                }
                .boxed()
                .shared();
                *slot = Some(attempt.clone());
                attempt
            }
        };

        let result = attempt.clone().await;
        let mut slot = self.inner.init.lock();
        if slot.as_ref().is_some_and(|pending| pending.ptr_eq(&attempt)) {
            *slot = None;
        }
        result
    }

    /// Send a user message.
    ///
    /// Returns the optimistic message under its temporary id. The message
    /// fails if no acknowledgment arrives within the message timeout.
    pub fn send_message(&self, content: &str, options: SendOptions) -> Result<Message> {
        self.inner.send_message(content, options)
    }

    /// Resend a failed user message under a new temporary id.
    pub fn retry_message(&self, id: &MessageId) -> Result<Message> {
        let inner = &self.inner;
        let content = {
            let registry = inner.registry.lock();
            let entry = registry
                .get(id)
                .ok_or_else(|| ValidationError::UnknownMessage(id.clone()))?;
            if entry.message.role != Role::User || entry.message.status != MessageStatus::Failed {
                return Err(ValidationError::NotRetryable(id.clone()).into());
            }
            entry.message.content.clone()
        };
        let _ = inner.validate_send(&content)?;

        let removed = inner.registry.lock().remove(id);
        if let Some(entry) = removed {
            inner.cancel_message_timer(&entry.temp_id);
            info!(message_id = %entry.message.id, "retrying message");
            inner.emit(SessionUpdate::MessageRemoved(entry.message.id));
        }
        inner.send_message(&content, SendOptions::default())
    }

    /// Leave the current chat and join `chat_id`.
    ///
    /// Stream buffers, tracked messages, and pending timers of the old chat
    /// are dropped.
    pub fn switch_chat(&self, chat_id: ChatId) -> Result<()> {
        let inner = &self.inner;
        let previous = inner
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.chat_id.clone())
            .ok_or(ValidationError::NoActiveSession)?;
        let state = inner.connection.state();
        if state != ConnectionState::Ready {
            return Err(ValidationError::NotReady(state).into());
        }
        if previous.as_ref() == Some(&chat_id) {
            return Ok(());
        }

        inner.typing.force_stop();
        if let Some(old) = &previous {
            inner.connection.send(&OutboundFrame::LeaveChat {
                chat_id: old.clone(),
            })?;
        }
        inner.connection.send(&OutboundFrame::JoinChat {
            chat_id: chat_id.clone(),
        })?;
        inner.connection.set_chat_id(Some(chat_id.clone()));

        let timers = {
            let mut s = inner.state.lock();
            if let Some(session) = s.session.as_mut() {
                session.chat_id = Some(chat_id.clone());
                session.degraded = false;
            }
            std::mem::take(&mut s.message_timers)
        };
        for task in timers.into_values() {
            task.abort();
        }
        inner.streams.clear();
        inner.registry.lock().clear();

        info!(from = ?previous.as_deref(), to = %chat_id, "switched chat");
        inner.emit(SessionUpdate::ChatSwitched {
            from: previous,
            to: chat_id,
        });
        Ok(())
    }

    /// Record a keystroke in the message input.
    pub fn typing(&self) {
        if self.inner.connection.is_ready() && self.inner.state.lock().session.is_some() {
            self.inner.typing.start_typing();
        }
    }

    /// The user stopped typing (input cleared or submitted).
    pub fn stop_typing(&self) {
        if self.inner.connection.is_ready() {
            self.inner.typing.stop_typing();
        }
    }

    /// Tear the session down. Idempotent.
    pub fn disconnect(&self) {
        let inner = &self.inner;
        let timers = {
            let mut s = inner.state.lock();
            s.generation += 1;
            s.started = false;
            s.rate_limited_until = None;
            std::mem::take(&mut s.teardown).cancel();
            std::mem::take(&mut s.message_timers)
        };
        for task in timers.into_values() {
            task.abort();
        }
        let had_init = inner.init.lock().take().is_some();

        inner.typing.force_stop();
        let had_session = inner.state.lock().session.take().is_some();
        inner.streams.clear();
        inner.registry.lock().clear();
        inner.connection.disconnect();

        if had_session || had_init {
            info!("session closed");
            inner.emit(SessionUpdate::Disconnected);
        }
    }

    /// The active session, if initialized.
    pub fn session(&self) -> Option<ChatSession> {
        self.inner.state.lock().session.clone()
    }

    /// Connection lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Whether messages can be sent right now.
    pub fn is_ready(&self) -> bool {
        self.session().is_some() && self.inner.connection.is_ready()
    }

    /// Tracked messages in conversation order.
    pub fn messages(&self) -> Vec<Message> {
        self.inner.registry.lock().messages()
    }

    /// Typing throttle counters.
    pub fn typing_stats(&self) -> TypingStats {
        self.inner.typing.stats()
    }

    /// Connection counters.
    pub fn connection_stats(&self) -> ConnectionStats {
        self.inner.connection.stats()
    }

    /// The underlying connection.
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.forwarder.abort();
        self.disconnect();
    }
}

fn typing_callback(weak: &Weak<Inner>, start: bool) -> TypingCallback {
    let weak = weak.clone();
    Arc::new(move || {
        let inner = weak.upgrade().ok_or(SessionError::Cancelled("typing"))?;
        let chat_id = inner.active_chat_id();
        let frame = if start {
            OutboundFrame::TypingStart { chat_id }
        } else {
            OutboundFrame::TypingStop { chat_id }
        };
        inner.connection.send(&frame)
    })
}

async fn forward_connection_state(weak: Weak<Inner>, mut changes: watch::Receiver<ConnectionState>) {
    while changes.changed().await.is_ok() {
        let state = *changes.borrow_and_update();
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.emit(SessionUpdate::ConnectionState(state));
        if state == ConnectionState::Failed {
            inner.on_connection_failed();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization and sending
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn emit(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    fn active_chat_id(&self) -> Option<ChatId> {
        self.state
            .lock()
            .session
            .as_ref()
            .and_then(|s| s.chat_id.clone())
    }

    fn check_generation(&self, generation: u64) -> Result<()> {
        if self.state.lock().generation == generation {
            Ok(())
        } else {
            Err(SessionError::Cancelled("initialize"))
        }
    }

    async fn run_initialize(
        self: Arc<Self>,
        options: InitializeOptions,
        generation: u64,
    ) -> Result<ChatSession> {
        if self.config.tenant_id.trim().is_empty() {
            return Err(ValidationError::MissingConfig("tenant_id").into());
        }

        if let Some(probe) = &self.health {
            if let Err(err) = self.await_healthy(probe.as_ref(), generation).await {
                return Err(self.fail_init(generation, err));
            }
        }

        let (chat_id, degraded) = match options.chat_id.clone() {
            Some(chat_id) => (Some(chat_id), false),
            None => match self.create_chat(&options, generation).await {
                Ok(chat_id) => (Some(chat_id), false),
                Err(err) if self.config.allow_degraded && err.is_retryable() => {
                    warn!(error = %err, "session creation failed, continuing in degraded mode");
                    (None, true)
                }
                Err(err) => return Err(self.fail_init(generation, err)),
            },
        };

        let session = ChatSession {
            chat_id,
            tenant_id: self.config.tenant_id.clone(),
            created_at: Utc::now(),
            degraded,
        };
        {
            let mut s = self.state.lock();
            if s.generation != generation {
                return Err(SessionError::Cancelled("initialize"));
            }
            s.session = Some(session.clone());
            s.started = false;
        }

        let mut changes = self.connection.state_changes();
        match self.connection.connect(session.chat_id.clone()).await {
            Ok(()) => {}
            Err(err)
                if !err.class().is_unrecoverable()
                    && self.connection.state() == ConnectionState::Reconnecting =>
            {
                debug!(error = %err, "initial connect failed, waiting for reconnection");
            }
            Err(err) => return Err(self.fail_init(generation, err)),
        }
        self.check_generation(generation)?;

        let outcome = time::timeout(self.config.ready_timeout, async {
            changes
                .wait_for(|s| {
                    matches!(
                        s,
                        ConnectionState::Ready | ConnectionState::Failed | ConnectionState::Disconnected
                    )
                })
                .await
                .map(|state| *state)
        })
        .await;
        self.check_generation(generation)?;

        match outcome {
            Ok(Ok(ConnectionState::Ready)) => {}
            Ok(Ok(_)) => {
                let err = self.connection.last_error().unwrap_or_else(|| {
                    SessionError::transport("connect", "connection failed before ready")
                });
                return Err(self.fail_init(generation, err));
            }
            Ok(Err(_)) => return Err(SessionError::Cancelled("initialize")),
            Err(_) => {
                let err = SessionError::Timeout {
                    kind: TimeoutKind::Ready,
                    timeout_ms: millis(self.config.ready_timeout),
                };
                return Err(self.fail_init(generation, err));
            }
        }

        {
            let mut s = self.state.lock();
            if s.generation != generation {
                return Err(SessionError::Cancelled("initialize"));
            }
            s.started = true;
        }
        info!(
            chat_id = ?session.chat_id.as_deref(),
            degraded = session.degraded,
            "session ready"
        );
        self.emit(SessionUpdate::SessionStarted(session.clone()));
        Ok(session)
    }

    async fn await_healthy(&self, probe: &dyn HealthProbe, generation: u64) -> Result<()> {
        let attempts = self.config.health_check_attempts.max(1);
        for attempt in 1..=attempts {
            match probe.check().await {
                Ok(()) => {
                    debug!(attempt, "backend healthy");
                    return Ok(());
                }
                Err(err) if err.class().is_unrecoverable() => return Err(err),
                Err(err) => {
                    warn!(attempt, error = %err, "backend not ready");
                    self.emit(SessionUpdate::Initialization {
                        phase: "health_check".into(),
                        message: Some(err.user_message().into()),
                    });
                    if attempt < attempts {
                        time::sleep(self.config.health_check_delay).await;
                        self.check_generation(generation)?;
                    }
                }
            }
        }
        warn!(attempts, "backend never reported healthy, continuing");
        Ok(())
    }

    async fn create_chat(&self, options: &InitializeOptions, generation: u64) -> Result<ChatId> {
        let request = CreateSessionRequest {
            session_id: options
                .session_id
                .clone()
                .unwrap_or_else(|| Uuid::now_v7().to_string()),
            visitor_id: options.visitor_id.clone().unwrap_or_default(),
            tenant_id: self.config.tenant_id.clone(),
        };
        let attempts = self.config.create_session_attempts.max(1);
        let base_ms = millis(self.config.create_session_delay);

        let mut attempt = 1;
        loop {
            match self.sessions.create_session(&request).await {
                Ok(chat_id) => {
                    info!(attempt, chat_id = %chat_id, "chat session created");
                    return Ok(chat_id);
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let mut delay_ms = exponential_delay_ms(attempt, base_ms);
                    if let SessionError::RateLimit {
                        retry_after_ms: Some(wait),
                        ..
                    } = &err
                    {
                        delay_ms = delay_ms.max(*wait);
                    }
                    warn!(attempt, delay_ms, error = %err, "session creation failed, retrying");
                    time::sleep(Duration::from_millis(delay_ms)).await;
                    self.check_generation(generation)?;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, class = %err.class(), "session creation failed");
                    return Err(err);
                }
            }
        }
    }

    /// Roll back a failed initialization. Returns `err` for propagation.
    fn fail_init(&self, generation: u64, err: SessionError) -> SessionError {
        let current = {
            let mut s = self.state.lock();
            let current = s.generation == generation;
            if current {
                s.session = None;
                s.started = false;
            }
            current
        };
        error!(error = %err, class = %err.class(), "initialization failed");
        if current {
            self.connection.disconnect();
            self.emit(SessionUpdate::Error {
                class: err.class(),
                message: err.user_message(),
            });
        }
        err
    }

    /// The connection gave up on a started session: drop the session and
    /// surface the failure so the next `initialize` starts over.
    fn on_connection_failed(&self) {
        let closed = {
            let mut s = self.state.lock();
            if !s.started {
                return;
            }
            s.started = false;
            s.rate_limited_until = None;
            s.session.take()
        };
        let Some(session) = closed else {
            return;
        };
        self.typing.force_stop();
        self.streams.clear();

        let err = self
            .connection
            .last_error()
            .unwrap_or_else(|| SessionError::transport("connect", "connection failed"));
        error!(
            chat_id = ?session.chat_id.as_deref(),
            error = %err,
            class = %err.class(),
            "connection failed, session closed"
        );
        self.emit(SessionUpdate::Error {
            class: err.class(),
            message: err.user_message(),
        });
    }

    fn validate_send(&self, content: &str) -> Result<ChatSession> {
        let (session, paused_until) = {
            let s = self.state.lock();
            (s.session.clone(), s.rate_limited_until)
        };
        let session = session.ok_or(ValidationError::NoActiveSession)?;
        let state = self.connection.state();
        if state != ConnectionState::Ready {
            return Err(ValidationError::NotReady(state).into());
        }
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyContent.into());
        }
        let len = trimmed.chars().count();
        if len > self.config.max_message_length {
            return Err(ValidationError::ContentTooLong {
                len,
                max: self.config.max_message_length,
            }
            .into());
        }
        if let Some(until) = paused_until {
            let now = Instant::now();
            if until > now {
                return Err(ValidationError::RateLimited {
                    remaining_ms: millis(until - now),
                }
                .into());
            }
        }
        Ok(session)
    }

    fn send_message(self: &Arc<Self>, content: &str, options: SendOptions) -> Result<Message> {
        let session = self.validate_send(content)?;
        let content = content.trim().to_owned();
        let mut draft = Message::user(content.clone());
        if let Some(id) = options.client_message_id {
            draft.id = id;
        }

        let entry = {
            let mut registry = self.registry.lock();
            let entry = registry.register_message(
                draft,
                MessageContext {
                    chat_id: session.chat_id.clone(),
                },
            )?;
            registry.update_message_state(&entry.temp_id, LifecycleState::Sending, None)?
        };
        let temp_id = entry.temp_id.clone();
        self.emit(SessionUpdate::MessageAdded(entry.message.clone()));
        self.arm_message_timeout(&temp_id);

        let frame = OutboundFrame::Message {
            content,
            chat_id: session.chat_id.clone(),
            client_message_id: temp_id.clone(),
        };
        if let Err(err) = self.connection.send(&frame) {
            warn!(message_id = %temp_id, error = %err, "message send failed");
            let _ = self.fail_message(&temp_id, "send failed");
            return Err(err);
        }
        info!(message_id = %temp_id, chat_id = ?session.chat_id.as_deref(), "message sent");
        Ok(entry.message)
    }

    fn arm_message_timeout(self: &Arc<Self>, temp_id: &MessageId) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.message_timeout;
        let mut s = self.state.lock();
        let generation = s.generation;
        let id = temp_id.clone();
        let task = tokio::spawn(async move {
            time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_message_timeout(&id, generation);
            }
        });
        if let Some(previous) = s.message_timers.insert(temp_id.clone(), task) {
            previous.abort();
        }
    }

    fn cancel_message_timer(&self, temp_id: &MessageId) {
        if let Some(task) = self.state.lock().message_timers.remove(temp_id) {
            task.abort();
        }
    }

    fn on_message_timeout(&self, temp_id: &MessageId, generation: u64) {
        {
            let mut s = self.state.lock();
            if s.generation != generation {
                return;
            }
            let _ = s.message_timers.remove(temp_id);
        }
        let pending = self
            .registry
            .lock()
            .get(temp_id)
            .is_some_and(|e| e.state == LifecycleState::Sending && !e.is_reconciled());
        if !pending {
            return;
        }
        warn!(
            message_id = %temp_id,
            timeout_ms = millis(self.config.message_timeout),
            "message not acknowledged"
        );
        if self.fail_message(temp_id, "not acknowledged").is_some() {
            let err = SessionError::Timeout {
                kind: TimeoutKind::Message,
                timeout_ms: millis(self.config.message_timeout),
            };
            self.emit(SessionUpdate::Error {
                class: err.class(),
                message: err.user_message(),
            });
        }
    }

    /// Mark a message failed and publish the change.
    fn fail_message(&self, id: &MessageId, reason: &str) -> Option<Message> {
        let updated = self.registry.lock().update_message_state(
            id,
            LifecycleState::Failed,
            Some(MessageMetadata::failure(reason)),
        );
        match updated {
            Ok(entry) => {
                self.cancel_message_timer(&entry.temp_id);
                self.emit(SessionUpdate::MessageUpdated(entry.message.clone()));
                Some(entry.message)
            }
            Err(err) => {
                debug!(message_id = %id, error = %err, "cannot mark message failed");
                None
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parley_core::ids::TenantId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls and fails every one after a short delay.
    struct RejectingSessions {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SessionService for RejectingSessions {
        async fn create_session(&self, _: &CreateSessionRequest) -> Result<ChatId> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            time::sleep(Duration::from_millis(50)).await;
            Err(SessionError::Unrecoverable("tenant not found".into()))
        }
    }

    fn coordinator(tenant: &str) -> (SessionCoordinator, Arc<RejectingSessions>) {
        let sessions = Arc::new(RejectingSessions {
            calls: AtomicUsize::new(0),
        });
        let config = CoordinatorConfig {
            tenant_id: TenantId::from(tenant),
            ..CoordinatorConfig::default()
        };
        let connection = ConnectionConfig {
            tenant_id: TenantId::from(tenant),
            ..ConnectionConfig::default()
        };
        let coordinator = SessionCoordinator::new(
            config,
            connection,
            Arc::clone(&sessions) as Arc<dyn SessionService>,
            None,
        );
        (coordinator, sessions)
    }

    #[tokio::test]
    async fn send_without_session_is_rejected() {
        let (c, _) = coordinator("acme");
        let err = c.send_message("hello", SendOptions::default()).unwrap_err();
        assert_matches!(err, SessionError::Validation(ValidationError::NoActiveSession));
        assert!(c.messages().is_empty());
    }

    #[tokio::test]
    async fn blank_tenant_is_missing_config() {
        let (c, sessions) = coordinator("  ");
        let err = c.initialize(InitializeOptions::default()).await.unwrap_err();
        assert_matches!(
            err,
            SessionError::Validation(ValidationError::MissingConfig("tenant_id"))
        );
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_initialize_creates_once() {
        let (c, sessions) = coordinator("acme");
        let (a, b) = tokio::join!(
            c.initialize(InitializeOptions::default()),
            c.initialize(InitializeOptions::default())
        );
        assert_matches!(a, Err(SessionError::Unrecoverable(_)));
        assert_matches!(b, Err(SessionError::Unrecoverable(_)));
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 1);
        assert!(c.session().is_none());

        // A failed attempt does not stick: the next call tries again.
        let _ = c.initialize(InitializeOptions::default()).await;
        assert_eq!(sessions.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unrecoverable_creation_does_not_degrade() {
        let (c, _) = coordinator("acme");
        let mut updates = c.subscribe();
        assert!(c.initialize(InitializeOptions::default()).await.is_err());
        assert_eq!(c.connection_state(), ConnectionState::Disconnected);
        assert_matches!(
            updates.recv().await,
            Ok(SessionUpdate::Error {
                class: parley_core::ErrorClass::Configuration,
                ..
            })
        );
    }

    /// Never answers within a test's lifetime.
    struct StalledSessions;

    #[async_trait]
    impl SessionService for StalledSessions {
        async fn create_session(&self, _: &CreateSessionRequest) -> Result<ChatId> {
            time::sleep(Duration::from_secs(600)).await;
            Ok(ChatId::from("late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_initialize() {
        let c = SessionCoordinator::new(
            CoordinatorConfig {
                tenant_id: TenantId::from("acme"),
                ..CoordinatorConfig::default()
            },
            ConnectionConfig::default(),
            Arc::new(StalledSessions),
            None,
        );
        let mut updates = c.subscribe();
        let started = Instant::now();

        let (a, b, ()) = tokio::join!(
            c.initialize(InitializeOptions::default()),
            c.initialize(InitializeOptions::default()),
            async {
                time::sleep(Duration::from_millis(10)).await;
                c.disconnect();
            }
        );

        assert_matches!(a, Err(SessionError::Cancelled("initialize")));
        assert_matches!(b, Err(SessionError::Cancelled("initialize")));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(c.session().is_none());
        assert_matches!(updates.try_recv(), Ok(SessionUpdate::Disconnected));
    }

    #[tokio::test]
    async fn disconnect_without_session_is_silent_and_idempotent() {
        let (c, _) = coordinator("acme");
        let mut updates = c.subscribe();
        c.disconnect();
        c.disconnect();
        assert_matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        );
    }

    #[tokio::test]
    async fn retry_unknown_message() {
        let (c, _) = coordinator("acme");
        let err = c.retry_message(&MessageId::from("nope")).unwrap_err();
        assert_matches!(
            err,
            SessionError::Validation(ValidationError::UnknownMessage(_))
        );
    }

    #[tokio::test]
    async fn switch_chat_requires_session() {
        let (c, _) = coordinator("acme");
        let err = c.switch_chat(ChatId::from("c2")).unwrap_err();
        assert_matches!(err, SessionError::Validation(ValidationError::NoActiveSession));
    }

    #[tokio::test]
    async fn typing_is_ignored_until_ready() {
        let (c, _) = coordinator("acme");
        c.typing();
        c.stop_typing();
        assert_eq!(c.typing_stats(), TypingStats::default());
    }
}
