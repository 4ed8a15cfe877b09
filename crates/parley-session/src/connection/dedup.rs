//! Inbound event deduplication.
//!
//! Reconnects and server-side retries can replay the same event. Each
//! event is reduced to a fingerprint and compared against a short,
//! bounded window of recently seen fingerprints.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parley_core::constants::FINGERPRINT_CONTENT_PREFIX;
use parley_core::events::{InboundEnvelope, SessionEvent};
use tokio::time::Instant;

/// Fingerprint used for duplicate detection, or `None` when the event is
/// exempt.
///
/// Chunks without a timestamp or sequence number are exempt: two identical
/// tokens in a row are legitimate content. Pings are exempt so every one is
/// answered.
pub fn fingerprint(envelope: &InboundEnvelope) -> Option<String> {
    match &envelope.event {
        SessionEvent::ResponseChunk { .. }
            if envelope.timestamp.is_none() && envelope.sequence.is_none() =>
        {
            return None;
        }
        SessionEvent::Ping { .. } => return None,
        _ => {}
    }

    let content: String = envelope
        .event
        .content()
        .unwrap_or_default()
        .chars()
        .take(FINGERPRINT_CONTENT_PREFIX)
        .collect();
    Some(format!(
        "{}|{}|{}|{}|{}|{}",
        envelope.event.name(),
        envelope.event.message_id().map_or("", |id| id.as_str()),
        envelope.chat_id.as_deref().unwrap_or_default(),
        envelope.timestamp.as_deref().unwrap_or_default(),
        envelope.sequence.map(|s| s.to_string()).unwrap_or_default(),
        content,
    ))
}

/// Sliding window of recently seen fingerprints.
pub struct EventDeduplicator {
    window: Duration,
    capacity: usize,
    order: VecDeque<(Instant, String)>,
    seen: HashMap<String, Instant>,
}

impl EventDeduplicator {
    /// Create a deduplicator remembering at most `capacity` fingerprints for
    /// `window`.
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashMap::new(),
        }
    }

    /// Record the event and report whether it repeats one seen within the
    /// window. Exempt events are never duplicates.
    pub fn is_duplicate(&mut self, envelope: &InboundEnvelope) -> bool {
        let Some(key) = fingerprint(envelope) else {
            return false;
        };
        let now = Instant::now();
        self.evict_expired(now);

        if self.seen.contains_key(&key) {
            return true;
        }
        while self.order.len() >= self.capacity {
            self.pop_oldest();
        }
        let _ = self.seen.insert(key.clone(), now);
        self.order.push_back((now, key));
        false
    }

    /// Number of fingerprints currently remembered.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some((at, _)) = self.order.front() {
            if now.duration_since(*at) < self.window {
                break;
            }
            self.pop_oldest();
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_front() {
            let _ = self.seen.remove(&key);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::events::ResponseComplete;
    use parley_core::ids::MessageId;
    use parley_core::messages::MessageMetadata;

    fn envelope(event: SessionEvent) -> InboundEnvelope {
        InboundEnvelope {
            wire_type: event.name().to_owned(),
            event,
            chat_id: Some("c1".into()),
            timestamp: None,
            sequence: None,
        }
    }

    fn complete(id: &str) -> InboundEnvelope {
        envelope(SessionEvent::ResponseComplete(ResponseComplete {
            message_id: MessageId::from(id),
            content: Some("done".into()),
            metadata: MessageMetadata::default(),
        }))
    }

    fn chunk(text: &str, sequence: Option<u64>) -> InboundEnvelope {
        let mut env = envelope(SessionEvent::ResponseChunk {
            message_id: "m1".into(),
            content: text.into(),
        });
        env.sequence = sequence;
        env
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_completion_is_duplicate() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(1), 256);
        assert!(!dedup.is_duplicate(&complete("m1")));
        assert!(dedup.is_duplicate(&complete("m1")));
        assert!(!dedup.is_duplicate(&complete("m2")));
    }

    #[tokio::test(start_paused = true)]
    async fn window_expiry_allows_repeat() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(1), 256);
        assert!(!dedup.is_duplicate(&complete("m1")));
        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(!dedup.is_duplicate(&complete("m1")));
    }

    #[tokio::test(start_paused = true)]
    async fn unsequenced_chunks_bypass() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(1), 256);
        assert!(!dedup.is_duplicate(&chunk("the", None)));
        assert!(!dedup.is_duplicate(&chunk("the", None)));
        assert!(dedup.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sequenced_chunks_are_checked() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(1), 256);
        assert!(!dedup.is_duplicate(&chunk("the", Some(3))));
        assert!(dedup.is_duplicate(&chunk("the", Some(3))));
        assert!(!dedup.is_duplicate(&chunk("the", Some(4))));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_bounds_memory() {
        let mut dedup = EventDeduplicator::new(Duration::from_secs(60), 3);
        for id in ["a", "b", "c", "d"] {
            assert!(!dedup.is_duplicate(&complete(id)));
        }
        assert_eq!(dedup.len(), 3);
        // "a" was evicted to make room for "d"
        assert!(!dedup.is_duplicate(&complete("a")));
        assert!(dedup.is_duplicate(&complete("d")));
    }

    #[test]
    fn pings_are_exempt() {
        let env = envelope(SessionEvent::Ping {
            timestamp: serde_json::json!(1),
        });
        assert!(fingerprint(&env).is_none());
    }

    #[test]
    fn fingerprint_truncates_content() {
        let long = "x".repeat(500);
        let env = envelope(SessionEvent::MessageReceived {
            message_id: "s1".into(),
            client_message_id: None,
            content: Some(long),
        });
        let key = fingerprint(&env).unwrap();
        assert!(key.starts_with("message_received|s1|c1|||"));
        assert_eq!(key.len(), "message_received|s1|c1|||".len() + FINGERPRINT_CONTENT_PREFIX);
    }

    #[test]
    fn chat_id_distinguishes_events() {
        let a = complete("m1");
        let mut b = complete("m1");
        b.chat_id = Some("c2".into());
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }
}
