//! Streamed response assembly.
//!
//! Fragments of an assistant response are buffered per message id and
//! surfaced as debounced [`StreamUpdate::Delta`]s. Each buffer has one expiry
//! task that fails the message if no fragment or completion arrives within
//! the stream timeout, and at most one pending flush task.
//!
//! Timer tasks hold a weak reference and the buffer's generation. A timer
//! that wakes after its buffer was completed, cleared, or replaced finds a
//! different generation (or no buffer) and does nothing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use parley_core::events::ResponseComplete;
use parley_core::ids::MessageId;
use parley_core::messages::{Message, MessageMetadata, MessageStatus};
use parley_settings::StreamSettings;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Failure reason attached to expired streams.
pub const STREAM_TIMEOUT_REASON: &str = "stream timed out";

/// Output of the assembler.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamUpdate {
    /// A new assistant message began streaming.
    Started(Message),
    /// Accumulated content after one or more fragments.
    Delta {
        /// Assistant message id.
        message_id: MessageId,
        /// Full content so far.
        content: String,
    },
    /// The response finished.
    Completed(Message),
    /// The response stalled and was abandoned.
    TimedOut(Message),
}

/// Receiver of [`StreamUpdate`]s. Invoked outside internal locks.
pub type StreamSink = Arc<dyn Fn(StreamUpdate) + Send + Sync>;

/// Assembler timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Silence after which an open stream fails.
    pub timeout: Duration,
    /// Window for batching fragments into one delta.
    pub debounce: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            debounce: Duration::from_millis(30),
        }
    }
}

impl From<&StreamSettings> for StreamConfig {
    fn from(s: &StreamSettings) -> Self {
        Self {
            timeout: Duration::from_millis(s.timeout_ms),
            debounce: Duration::from_millis(s.debounce_ms),
        }
    }
}

struct StreamBuffer {
    generation: u64,
    content: String,
    chunks: Vec<String>,
    started_at: Instant,
    deadline: Instant,
    expiry: Option<JoinHandle<()>>,
    flush: Option<JoinHandle<()>>,
}

impl StreamBuffer {
    fn cancel_timers(&mut self) {
        if let Some(task) = self.expiry.take() {
            task.abort();
        }
        if let Some(task) = self.flush.take() {
            task.abort();
        }
    }
}

struct Inner {
    config: StreamConfig,
    sink: StreamSink,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    next_generation: u64,
    buffers: HashMap<MessageId, StreamBuffer>,
}

/// Buffers streamed fragments per assistant message.
pub struct StreamAssembler {
    inner: Arc<Inner>,
}

impl StreamAssembler {
    /// Create an assembler emitting into `sink`.
    pub fn new(config: StreamConfig, sink: StreamSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Open a buffer for `message_id`. Returns `false` if one is already open.
    pub fn start(&self, message_id: &MessageId) -> bool {
        let started = {
            let mut state = self.inner.state.lock();
            if state.buffers.contains_key(message_id) {
                return false;
            }
            self.open(&mut state, message_id)
        };
        (self.inner.sink)(StreamUpdate::Started(started));
        true
    }

    fn open(&self, state: &mut State, message_id: &MessageId) -> Message {
        state.next_generation += 1;
        let generation = state.next_generation;
        let now = Instant::now();
        let expiry = tokio::spawn(expire(
            Arc::downgrade(&self.inner),
            message_id.clone(),
            generation,
        ));
        let _ = state.buffers.insert(
            message_id.clone(),
            StreamBuffer {
                generation,
                content: String::new(),
                chunks: Vec::new(),
                started_at: now,
                deadline: now + self.inner.config.timeout,
                expiry: Some(expiry),
                flush: None,
            },
        );
        debug!(message_id = %message_id, "stream started");
        Message::assistant(message_id.clone(), "", MessageStatus::Streaming)
    }

    /// Append a fragment, opening a buffer if none exists.
    pub fn push_chunk(&self, message_id: &MessageId, chunk: &str) {
        let mut emit = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if !state.buffers.contains_key(message_id) {
                emit.push(StreamUpdate::Started(self.open(&mut state, message_id)));
            }
            let debounce = self.inner.config.debounce;
            let timeout = self.inner.config.timeout;
            let Some(buffer) = state.buffers.get_mut(message_id) else {
                return;
            };
            buffer.content.push_str(chunk);
            buffer.chunks.push(chunk.to_owned());
            buffer.deadline = Instant::now() + timeout;

            if debounce.is_zero() {
                emit.push(StreamUpdate::Delta {
                    message_id: message_id.clone(),
                    content: buffer.content.clone(),
                });
            } else if buffer.flush.is_none() {
                buffer.flush = Some(tokio::spawn(flush(
                    Arc::downgrade(&self.inner),
                    message_id.clone(),
                    buffer.generation,
                )));
            }
        }
        for update in emit {
            (self.inner.sink)(update);
        }
    }

    /// Finish the response for `payload.message_id`.
    ///
    /// Content missing from the payload is taken from the buffer. Without a
    /// buffer the message is built from the payload alone.
    pub fn complete(&self, payload: ResponseComplete) -> Message {
        let buffer = self.inner.state.lock().buffers.remove(&payload.message_id);
        let (buffered, chunk_count, elapsed) = match buffer {
            Some(mut buffer) => {
                buffer.cancel_timers();
                let elapsed = buffer.started_at.elapsed();
                (Some(buffer.content), buffer.chunks.len(), Some(elapsed))
            }
            None => (None, 0, None),
        };

        let content = payload
            .content
            .filter(|c| !c.is_empty())
            .or(buffered)
            .unwrap_or_default();
        let mut message = Message::assistant(payload.message_id, content, MessageStatus::Received);
        message.metadata = payload.metadata;

        debug!(
            message_id = %message.id,
            chunks = chunk_count,
            elapsed_ms = ?elapsed.map(|e| e.as_millis()),
            "stream completed"
        );
        (self.inner.sink)(StreamUpdate::Completed(message.clone()));
        message
    }

    /// Drop the buffer for `message_id` without emitting anything.
    /// Returns whether one was open.
    pub fn discard(&self, message_id: &MessageId) -> bool {
        let removed = self.inner.state.lock().buffers.remove(message_id);
        match removed {
            Some(mut buffer) => {
                buffer.cancel_timers();
                true
            }
            None => false,
        }
    }

    /// Whether a buffer is open for `message_id`.
    pub fn is_streaming(&self, message_id: &MessageId) -> bool {
        self.inner.state.lock().buffers.contains_key(message_id)
    }

    /// Content buffered so far for `message_id`.
    pub fn buffered_content(&self, message_id: &MessageId) -> Option<String> {
        self.inner
            .state
            .lock()
            .buffers
            .get(message_id)
            .map(|b| b.content.clone())
    }

    /// Number of open buffers.
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().buffers.len()
    }

    /// Cancel every timer, then drop every buffer. Emits nothing.
    pub fn clear(&self) {
        let mut state = self.inner.state.lock();
        for buffer in state.buffers.values_mut() {
            buffer.cancel_timers();
        }
        state.buffers.clear();
    }
}

impl Drop for StreamAssembler {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn flush(inner: Weak<Inner>, message_id: MessageId, generation: u64) {
    let Some(debounce) = inner.upgrade().map(|i| i.config.debounce) else {
        return;
    };
    time::sleep(debounce).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    let content = {
        let mut state = inner.state.lock();
        let Some(buffer) = state
            .buffers
            .get_mut(&message_id)
            .filter(|b| b.generation == generation)
        else {
            return;
        };
        buffer.flush = None;
        buffer.content.clone()
    };
    (inner.sink)(StreamUpdate::Delta {
        message_id,
        content,
    });
}

async fn expire(inner: Weak<Inner>, message_id: MessageId, generation: u64) {
    loop {
        let deadline = {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let state = inner.state.lock();
            match state.buffers.get(&message_id) {
                Some(b) if b.generation == generation => b.deadline,
                _ => return,
            }
        };
        time::sleep_until(deadline).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let expired = {
            let mut state = inner.state.lock();
            let due = state
                .buffers
                .get(&message_id)
                .filter(|b| b.generation == generation)
                .map(|b| Instant::now() >= b.deadline);
            match due {
                Some(true) => state.buffers.remove(&message_id),
                Some(false) => None,
                None => return,
            }
        };
        let Some(mut buffer) = expired else {
            continue;
        };
        if let Some(task) = buffer.flush.take() {
            task.abort();
        }
        // This task is the expiry handle; dropping it detaches.
        drop(buffer.expiry.take());

        warn!(
            message_id = %message_id,
            chunks = buffer.chunks.len(),
            timeout_ms = ?inner.config.timeout.as_millis(),
            "stream timed out"
        );
        let mut message =
            Message::assistant(message_id, buffer.content, MessageStatus::Failed);
        message.metadata = MessageMetadata::failure(STREAM_TIMEOUT_REASON);
        (inner.sink)(StreamUpdate::TimedOut(message));
        return;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn collector() -> (Arc<Mutex<Vec<StreamUpdate>>>, StreamSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sink: StreamSink = Arc::new(move |u: StreamUpdate| s.lock().push(u));
        (seen, sink)
    }

    fn completion(id: &str, content: Option<&str>) -> ResponseComplete {
        ResponseComplete {
            message_id: MessageId::from(id),
            content: content.map(str::to_owned),
            metadata: MessageMetadata {
                model: Some("m-1".into()),
                ..MessageMetadata::default()
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_reassemble_without_completion_content() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        assert!(asm.start(&id));
        for chunk in ["Hel", "lo, ", "world"] {
            asm.push_chunk(&id, chunk);
        }
        let message = asm.complete(completion("a1", None));
        assert_eq!(message.content, "Hello, world");
        assert_eq!(message.status, MessageStatus::Received);
        assert_eq!(message.metadata.model.as_deref(), Some("m-1"));
        assert!(!asm.is_streaming(&id));

        let updates = seen.lock().clone();
        assert_matches!(updates.first(), Some(StreamUpdate::Started(_)));
        assert_matches!(updates.last(), Some(StreamUpdate::Completed(m)) if m.content == "Hello, world");
    }

    #[tokio::test(start_paused = true)]
    async fn completion_content_wins() {
        let (_, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "partial");
        let message = asm.complete(completion("a1", Some("full answer")));
        assert_eq!(message.content, "full answer");
    }

    #[tokio::test(start_paused = true)]
    async fn completion_without_buffer_builds_message() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let message = asm.complete(completion("a9", Some("standalone")));
        assert_eq!(message.id.as_str(), "a9");
        assert_eq!(message.content, "standalone");
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_for_unknown_message_starts_stream() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "hi");
        assert!(asm.is_streaming(&id));
        assert!(!asm.start(&id));
        assert_matches!(seen.lock().first(), Some(StreamUpdate::Started(m)) if m.id == id);
    }

    #[tokio::test(start_paused = true)]
    async fn deltas_are_debounced() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "a");
        asm.push_chunk(&id, "b");
        asm.push_chunk(&id, "c");
        time::sleep(Duration::from_millis(31)).await;

        let deltas: Vec<String> = seen
            .lock()
            .iter()
            .filter_map(|u| match u {
                StreamUpdate::Delta { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, vec!["abc".to_string()]);

        asm.push_chunk(&id, "d");
        time::sleep(Duration::from_millis(31)).await;
        assert_matches!(
            seen.lock().last(),
            Some(StreamUpdate::Delta { content, .. }) if content == "abcd"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_times_out() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "part");
        time::sleep(Duration::from_secs(21)).await;

        assert!(!asm.is_streaming(&id));
        assert_matches!(
            seen.lock().last(),
            Some(StreamUpdate::TimedOut(m))
                if m.status == MessageStatus::Failed
                    && m.content == "part"
                    && m.metadata.failure_reason.as_deref() == Some(STREAM_TIMEOUT_REASON)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fragments_extend_the_deadline() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        assert!(asm.start(&id));
        time::sleep(Duration::from_secs(15)).await;
        asm.push_chunk(&id, "still here");
        time::sleep(Duration::from_secs(15)).await;
        assert!(asm.is_streaming(&id));
        assert!(
            !seen
                .lock()
                .iter()
                .any(|u| matches!(u, StreamUpdate::TimedOut(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn completion_cancels_expiry() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "x");
        let _ = asm.complete(completion("a1", None));
        time::sleep(Duration::from_secs(30)).await;
        assert!(
            !seen
                .lock()
                .iter()
                .any(|u| matches!(u, StreamUpdate::TimedOut(_) | StreamUpdate::Delta { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_every_timer() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        asm.push_chunk(&MessageId::from("a1"), "x");
        asm.push_chunk(&MessageId::from("a2"), "y");
        assert_eq!(asm.active_count(), 2);
        asm.clear();
        let before = seen.lock().len();
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(asm.active_count(), 0);
        assert_eq!(seen.lock().len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn discard_is_silent() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(StreamConfig::default(), sink);
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "x");
        assert!(asm.discard(&id));
        assert!(!asm.discard(&id));
        time::sleep(Duration::from_secs(30)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_debounce_emits_immediately() {
        let (seen, sink) = collector();
        let asm = StreamAssembler::new(
            StreamConfig {
                debounce: Duration::ZERO,
                ..StreamConfig::default()
            },
            sink,
        );
        let id = MessageId::from("a1");
        asm.push_chunk(&id, "a");
        asm.push_chunk(&id, "b");
        assert_eq!(asm.buffered_content(&id).as_deref(), Some("ab"));
        assert_eq!(seen.lock().len(), 3);
    }
}
