//! Transport connection lifecycle.
//!
//! [`ConnectionManager`] owns at most one live link (socket plus its reader,
//! writer, and watchdog tasks) and drives the [`ConnectionState`] machine:
//!
//! - `connect` opens a link bound to a tenant and optional chat
//! - recoverable failures schedule reconnection with classified backoff
//! - inbound frames are parsed, normalized, deduplicated, handled
//!   internally (client id, readiness, pongs), then dispatched to listeners
//! - `send` is gated on [`ConnectionState::Ready`]; pongs bypass the gate
//!
//! Every asynchronous continuation captures the generation current when it
//! was scheduled. `connect` and `disconnect` bump the generation, so a stale
//! reconnect loop or handshake wakes up, sees the mismatch, and does nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use parley_core::errors::{CloseDisposition, ErrorClass, classify_close};
use parley_core::errors::classify::CLOSE_ABNORMAL;
use parley_core::events::{EventKind, SessionEvent};
use parley_core::frames::OutboundFrame;
use parley_core::ids::{ChatId, ClientId};
use parley_core::retry::reconnect_delay_ms;
use parley_core::state::ConnectionState;
use parley_core::{Result, SessionError, TimeoutKind, ValidationError};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::bus::{EventBus, EventHandler};
use super::config::ConnectionConfig;
use super::dedup::EventDeduplicator;
use super::heartbeat::{HeartbeatResult, LinkActivity, pong_for, run_watchdog};
use super::url::build_connection_url;
use crate::normalizer::parse_frame;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a closing writer may spend delivering the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ─────────────────────────────────────────────────────────────────────────────
// Public snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Reconnection bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconnectState {
    /// Attempts made since the link was last ready.
    pub attempt: u32,
    /// Class of the failure that triggered reconnection.
    pub last_class: Option<ErrorClass>,
    /// Delay computed before the most recent attempt.
    pub last_delay_ms: Option<u64>,
}

/// Connection counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Frames received (before deduplication).
    pub frames_in: u64,
    /// Frames queued for sending.
    pub frames_out: u64,
    /// Inbound events dropped as duplicates.
    pub duplicates_dropped: u64,
    /// Inbound frames dropped as malformed.
    pub protocol_errors: u64,
    /// Reconnection attempts scheduled.
    pub reconnect_attempts: u64,
    /// Links successfully opened.
    pub links_opened: u64,
}

#[derive(Default)]
struct Counters {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    duplicates_dropped: AtomicU64,
    protocol_errors: AtomicU64,
    reconnect_attempts: AtomicU64,
    links_opened: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            duplicates_dropped: self.duplicates_dropped.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            links_opened: self.links_opened.load(Ordering::Relaxed),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

enum Outbound {
    Text(String),
    Close,
}

/// Handles to one open socket.
struct Link {
    id: u64,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
}

impl Link {
    /// Stop the reader and watchdog. The writer drains, optionally sends a
    /// normal close, and exits once the sender is dropped.
    fn shutdown(self, send_close: bool) {
        if send_close {
            let _ = self.outbound.try_send(Outbound::Close);
        }
        self.cancel.cancel();
    }
}

struct LinkState {
    state: ConnectionState,
    generation: u64,
    next_link_id: u64,
    chat_id: Option<ChatId>,
    client_id: Option<ClientId>,
    link: Option<Link>,
    reconnect: ReconnectState,
    reconnect_task: Option<JoinHandle<()>>,
    last_error: Option<SessionError>,
}

impl LinkState {
    fn is_current(&self, link_id: u64) -> bool {
        self.link.as_ref().is_some_and(|l| l.id == link_id)
    }
}

struct Inner {
    config: ConnectionConfig,
    link: Mutex<LinkState>,
    bus: EventBus,
    dedup: Mutex<EventDeduplicator>,
    counters: Counters,
    state_tx: watch::Sender<ConnectionState>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ConnectionManager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the transport connection and its lifecycle.
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state.
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let dedup = EventDeduplicator::new(config.dedup_window, config.dedup_capacity);
        let link = LinkState {
            state: ConnectionState::Disconnected,
            generation: 0,
            next_link_id: 0,
            chat_id: None,
            client_id: config.client_id.clone(),
            link: None,
            reconnect: ReconnectState::default(),
            reconnect_task: None,
            last_error: None,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                link: Mutex::new(link),
                bus: EventBus::new(),
                dedup: Mutex::new(dedup),
                counters: Counters::default(),
                state_tx,
            }),
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    /// Whether application frames may be sent.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Observe state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Chat the connection is bound to.
    pub fn chat_id(&self) -> Option<ChatId> {
        self.inner.link.lock().chat_id.clone()
    }

    /// Rebind future connection attempts to `chat_id` without reconnecting.
    pub fn set_chat_id(&self, chat_id: Option<ChatId>) {
        self.inner.link.lock().chat_id = chat_id;
    }

    /// Client id, as configured or as assigned by the server.
    pub fn client_id(&self) -> Option<ClientId> {
        self.inner.link.lock().client_id.clone()
    }

    /// Reconnection bookkeeping.
    pub fn reconnect_state(&self) -> ReconnectState {
        self.inner.link.lock().reconnect
    }

    /// Most recent connection failure, cleared by `connect`.
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.link.lock().last_error.clone()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ConnectionStats {
        self.inner.counters.snapshot()
    }

    /// Register a listener. Returns `false` if already registered for `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        self.inner.bus.subscribe(kind, handler)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&self, kind: EventKind, handler: &EventHandler) -> bool {
        self.inner.bus.unsubscribe(kind, handler)
    }

    /// Open a connection bound to the configured tenant and `chat_id`.
    ///
    /// Any existing link is closed first. On a recoverable failure the
    /// manager moves to `Reconnecting` and keeps trying in the background;
    /// the error is still returned. Unrecoverable failures leave it `Failed`.
    pub async fn connect(&self, chat_id: Option<ChatId>) -> Result<()> {
        let inner = &self.inner;
        let (generation, url) = {
            let mut s = inner.link.lock();
            let url = inner.url_for(chat_id.as_ref(), s.client_id.as_ref())?;
            inner.reset(&mut s);
            let _ = inner.transition(&mut s, ConnectionState::Disconnected);
            s.chat_id = chat_id;
            s.last_error = None;
            let _ = inner.transition(&mut s, ConnectionState::Connecting);
            (s.generation, url)
        };
        inner.dedup.lock().clear();

        info!(
            tenant_id = %inner.config.tenant_id,
            chat_id = ?self.chat_id().as_deref(),
            "connecting"
        );
        match inner.open_link(generation, &url).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, class = %err.class(), "connect failed");
                inner.on_connect_failed(generation, err.clone());
                Err(err)
            }
        }
    }

    /// Drop the current link (if any) and schedule reconnection after a
    /// failure of `class`.
    ///
    /// Only meaningful while a link is open or pending: from `Disconnected`
    /// or `Failed` nothing is scheduled and `false` is returned. Unrecoverable
    /// classes move straight to `Failed`.
    pub fn attempt_reconnect(&self, class: ErrorClass) -> bool {
        let mut s = self.inner.link.lock();
        if !s.state.is_open() && !s.state.is_pending() {
            return false;
        }
        if let Some(link) = s.link.take() {
            link.shutdown(true);
        }
        self.inner.schedule_reconnect(&mut s, class)
    }

    /// Queue `frame` for sending.
    ///
    /// Application frames require `Ready`; pongs only require an open link.
    pub fn send(&self, frame: &OutboundFrame) -> Result<()> {
        let s = self.inner.link.lock();
        if !frame.is_control() && s.state != ConnectionState::Ready {
            return Err(ValidationError::NotReady(s.state).into());
        }
        let Some(link) = s.link.as_ref() else {
            return Err(ValidationError::NotReady(s.state).into());
        };
        self.inner.enqueue(link, frame)
    }

    /// Close the connection and cancel any pending reconnection.
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        let mut s = self.inner.link.lock();
        let was = s.state;
        self.inner.reset(&mut s);
        s.reconnect = ReconnectState::default();
        let _ = self.inner.transition(&mut s, ConnectionState::Disconnected);
        drop(s);

        if was != ConnectionState::Disconnected {
            info!(from = %was, "disconnected");
        }
        self.inner.dedup.lock().clear();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle internals
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn url_for(&self, chat_id: Option<&ChatId>, client_id: Option<&ClientId>) -> Result<Url> {
        build_connection_url(
            &self.config.url,
            &self.config.tenant_id,
            chat_id,
            client_id,
            self.config.token.as_deref(),
        )
    }

    /// Invalidate every continuation and close the current link.
    fn reset(&self, s: &mut LinkState) {
        s.generation += 1;
        if let Some(task) = s.reconnect_task.take() {
            task.abort();
        }
        if let Some(link) = s.link.take() {
            link.shutdown(true);
        }
    }

    fn transition(&self, s: &mut LinkState, next: ConnectionState) -> bool {
        if s.state == next {
            return true;
        }
        if !s.state.can_transition_to(next) {
            warn!(from = %s.state, to = %next, "refusing illegal connection state transition");
            return false;
        }
        debug!(from = %s.state, to = %next, "connection state");
        s.state = next;
        let _ = self.state_tx.send_replace(next);
        true
    }

    fn schedule_reconnect(self: &Arc<Self>, s: &mut LinkState, class: ErrorClass) -> bool {
        if class.is_unrecoverable() || !self.config.reconnect_enabled {
            error!(class = %class, "connection failed, not reconnecting");
            let _ = self.transition(s, ConnectionState::Failed);
            return false;
        }
        if !self.transition(s, ConnectionState::Reconnecting) {
            return false;
        }
        if let Some(task) = s.reconnect_task.take() {
            task.abort();
        }
        s.reconnect.last_class = Some(class);
        let generation = s.generation;
        let inner = Arc::clone(self);
        s.reconnect_task = Some(tokio::spawn(inner.reconnect_loop(generation, class)));
        true
    }

    fn on_connect_failed(self: &Arc<Self>, generation: u64, err: SessionError) {
        let mut s = self.link.lock();
        if s.generation != generation {
            return;
        }
        let class = err.class();
        s.last_error = Some(err);
        let _ = self.schedule_reconnect(&mut s, class);
    }

    async fn reconnect_loop(self: Arc<Self>, generation: u64, mut class: ErrorClass) {
        loop {
            let (attempt, delay_ms, url) = {
                let mut s = self.link.lock();
                if s.generation != generation {
                    return;
                }
                s.reconnect.attempt += 1;
                let attempt = s.reconnect.attempt;
                if attempt > self.config.reconnect.max_attempts {
                    warn!(attempts = attempt - 1, class = %class, "reconnect attempts exhausted");
                    let _ = self.transition(&mut s, ConnectionState::Failed);
                    return;
                }
                let delay_ms =
                    reconnect_delay_ms(&self.config.reconnect, attempt, class, rand::random::<f64>());
                s.reconnect.last_delay_ms = Some(delay_ms);
                s.reconnect.last_class = Some(class);
                match self.url_for(s.chat_id.as_ref(), s.client_id.as_ref()) {
                    Ok(url) => (attempt, delay_ms, url),
                    Err(err) => {
                        error!(error = %err, "cannot build reconnect url");
                        s.last_error = Some(err);
                        let _ = self.transition(&mut s, ConnectionState::Failed);
                        return;
                    }
                }
            };

            Counters::bump(&self.counters.reconnect_attempts);
            info!(attempt, delay_ms, class = %class, "reconnecting");
            time::sleep(Duration::from_millis(delay_ms)).await;

            {
                let mut s = self.link.lock();
                if s.generation != generation
                    || !self.transition(&mut s, ConnectionState::Connecting)
                {
                    return;
                }
            }

            match self.open_link(generation, &url).await {
                Ok(()) => {
                    // The attempt count survives until the link reports ready.
                    info!(attempt, "reconnected");
                    return;
                }
                Err(err) => {
                    class = err.class();
                    warn!(attempt, class = %class, error = %err, "reconnect attempt failed");
                    let mut s = self.link.lock();
                    if s.generation != generation {
                        return;
                    }
                    s.last_error = Some(err);
                    if class.is_unrecoverable() {
                        let _ = self.transition(&mut s, ConnectionState::Failed);
                        return;
                    }
                    let _ = self.transition(&mut s, ConnectionState::Reconnecting);
                }
            }
        }
    }

    async fn open_link(self: &Arc<Self>, generation: u64, url: &Url) -> Result<()> {
        let handshake = time::timeout(self.config.connect_timeout, connect_async(url.as_str())).await;
        let ws = match handshake {
            Err(_) => {
                return Err(SessionError::Timeout {
                    kind: TimeoutKind::Connect,
                    timeout_ms: u64::try_from(self.config.connect_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
            Ok(Err(err)) => return Err(handshake_error(&err)),
            Ok(Ok((ws, _response))) => ws,
        };
        self.install_link(generation, ws)
    }

    fn install_link(self: &Arc<Self>, generation: u64, ws: WsStream) -> Result<()> {
        let mut s = self.link.lock();
        if s.generation != generation || !self.transition(&mut s, ConnectionState::Connected) {
            return Err(SessionError::Cancelled("connect"));
        }
        s.next_link_id += 1;
        let link_id = s.next_link_id;

        let (tx, rx) = mpsc::channel(self.config.outbound_buffer);
        let cancel = CancellationToken::new();
        let activity = Arc::new(LinkActivity::default());
        let (ws_tx, ws_rx) = ws.split();

        let _ = tokio::spawn(write_loop(ws_tx, rx));
        let _ = tokio::spawn(Arc::clone(self).read_loop(
            link_id,
            ws_rx,
            Arc::clone(&activity),
            cancel.clone(),
        ));
        let _ = tokio::spawn(Arc::clone(self).watch_link(link_id, activity, cancel.clone()));

        s.link = Some(Link {
            id: link_id,
            outbound: tx,
            cancel,
        });
        Counters::bump(&self.counters.links_opened);
        info!(link_id, chat_id = ?s.chat_id.as_deref(), "connection open");
        Ok(())
    }

    fn enqueue(&self, link: &Link, frame: &OutboundFrame) -> Result<()> {
        let text = frame
            .to_json()
            .map_err(|e| SessionError::Protocol(format!("cannot encode frame: {e}")))?;
        match link.outbound.try_send(Outbound::Text(text)) {
            Ok(()) => {
                Counters::bump(&self.counters.frames_out);
                debug!(frame = frame.type_name(), "frame queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(SessionError::from_class(
                "send",
                ErrorClass::Network,
                "outbound queue full",
            )),
            Err(TrySendError::Closed(_)) => Err(SessionError::from_class(
                "send",
                ErrorClass::Network,
                "connection closed",
            )),
        }
    }

    // ── Link tasks ───────────────────────────────────────────────────────

    async fn read_loop(
        self: Arc<Self>,
        link_id: u64,
        mut ws_rx: SplitStream<WsStream>,
        activity: Arc<LinkActivity>,
        cancel: CancellationToken,
    ) {
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => return,
                msg = ws_rx.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    activity.touch();
                    self.handle_text(link_id, text.as_str());
                }
                Some(Ok(Message::Binary(bytes))) => {
                    activity.touch();
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        self.handle_text(link_id, text);
                    } else {
                        Counters::bump(&self.counters.protocol_errors);
                        warn!(link_id, "dropping non-UTF-8 binary frame");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((1005, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    });
                    self.on_link_closed(link_id, code, &reason);
                    return;
                }
                Some(Ok(_)) => activity.touch(),
                Some(Err(err)) => {
                    self.on_link_lost(link_id, SessionError::transport("receive", err.to_string()));
                    return;
                }
                None => {
                    self.on_link_closed(link_id, CLOSE_ABNORMAL, "stream ended");
                    return;
                }
            }
        }
    }

    async fn watch_link(
        self: Arc<Self>,
        link_id: u64,
        activity: Arc<LinkActivity>,
        cancel: CancellationToken,
    ) {
        let timeout = self.config.heartbeat_timeout;
        if run_watchdog(&activity, timeout, cancel).await == HeartbeatResult::TimedOut {
            warn!(link_id, timeout_ms = ?timeout.as_millis(), "no inbound traffic, treating link as dead");
            self.on_link_lost(
                link_id,
                SessionError::from_class("heartbeat", ErrorClass::Network, "heartbeat timeout"),
            );
        }
    }

    fn handle_text(&self, link_id: u64, text: &str) {
        Counters::bump(&self.counters.frames_in);
        let envelope = match parse_frame(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                Counters::bump(&self.counters.protocol_errors);
                warn!(link_id, error = %err, "dropping malformed frame");
                return;
            }
        };
        if self.dedup.lock().is_duplicate(&envelope) {
            Counters::bump(&self.counters.duplicates_dropped);
            debug!(event = envelope.event.name(), "dropping duplicate event");
            return;
        }

        match &envelope.event {
            SessionEvent::ConnectionEstablished { client_id, .. } => {
                let mut s = self.link.lock();
                if s.is_current(link_id) {
                    if let Some(id) = client_id {
                        debug!(client_id = %id, "server assigned client id");
                        s.client_id = Some(id.clone());
                    }
                }
            }
            SessionEvent::ConnectionReady => {
                let mut s = self.link.lock();
                if s.is_current(link_id) && self.transition(&mut s, ConnectionState::Ready) {
                    s.reconnect = ReconnectState::default();
                    info!(link_id, "connection ready");
                }
            }
            SessionEvent::Ping { .. } => {
                if let Some(pong) = pong_for(&envelope.event) {
                    let s = self.link.lock();
                    if let Some(link) = s.link.as_ref().filter(|l| l.id == link_id) {
                        if let Err(err) = self.enqueue(link, &pong) {
                            debug!(error = %err, "could not answer ping");
                        }
                    }
                }
            }
            _ => {}
        }

        self.bus.dispatch(&envelope);
    }

    fn on_link_closed(self: &Arc<Self>, link_id: u64, code: u16, reason: &str) {
        let mut s = self.link.lock();
        if !s.is_current(link_id) {
            return;
        }
        if let Some(link) = s.link.take() {
            link.shutdown(false);
        }
        match classify_close(code, reason) {
            CloseDisposition::Normal => {
                info!(code, reason, "server closed the connection");
                let _ = self.transition(&mut s, ConnectionState::Disconnected);
            }
            CloseDisposition::Terminal(class) => {
                error!(code, reason, class = %class, "connection rejected");
                s.last_error = Some(SessionError::from_class(
                    "connect",
                    class,
                    format!("closed with code {code}: {reason}"),
                ));
                let _ = self.transition(&mut s, ConnectionState::Failed);
            }
            CloseDisposition::Retry(class) => {
                warn!(code, reason, class = %class, "connection lost");
                s.last_error = Some(SessionError::from_class(
                    "receive",
                    class,
                    format!("closed with code {code}: {reason}"),
                ));
                let _ = self.schedule_reconnect(&mut s, class);
            }
        }
    }

    fn on_link_lost(self: &Arc<Self>, link_id: u64, err: SessionError) {
        let mut s = self.link.lock();
        if !s.is_current(link_id) {
            return;
        }
        if let Some(link) = s.link.take() {
            link.shutdown(false);
        }
        let class = err.class();
        warn!(link_id, class = %class, error = %err, "connection lost");
        s.last_error = Some(err);
        let _ = self.schedule_reconnect(&mut s, class);
    }
}

async fn write_loop(mut ws_tx: SplitSink<WsStream, Message>, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Text(text) => {
                if let Err(err) = ws_tx.send(Message::Text(text.into())).await {
                    debug!(error = %err, "socket write failed");
                    break;
                }
            }
            Outbound::Close => {
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: Utf8Bytes::from_static("client disconnect"),
                };
                let _ = time::timeout(CLOSE_GRACE, ws_tx.send(Message::Close(Some(frame)))).await;
                break;
            }
        }
    }
    let _ = time::timeout(CLOSE_GRACE, ws_tx.close()).await;
}

/// Map a failed handshake onto the error taxonomy.
fn handshake_error(err: &tungstenite::Error) -> SessionError {
    match err {
        tungstenite::Error::Http(response) => rejected_handshake(response.status().as_u16()),
        other => SessionError::transport("connect", other.to_string()),
    }
}

fn rejected_handshake(status: u16) -> SessionError {
    SessionError::from_class(
        "connect",
        ErrorClass::from_status(status),
        format!("handshake rejected with HTTP {status}"),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
