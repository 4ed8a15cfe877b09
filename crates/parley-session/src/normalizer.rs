//! Inbound frame normalization.
//!
//! The backend has shipped several frame shapes over time: `{type, data}`
//! envelopes, flattened `{type, ...fields}` frames, camelCase and snake_case
//! field names, and a handful of synonyms per event type. Everything here is
//! pure; [`normalize_inbound`] turns any accepted shape into one
//! [`InboundEnvelope`] carrying a canonical [`SessionEvent`].

use parley_core::events::{EventKind, InboundEnvelope, ResponseComplete, SessionEvent};
use parley_core::ids::{ChatId, ClientId, MessageId, TenantId};
use parley_core::messages::{MessageMetadata, Source};
use parley_core::retry::parse_retry_after;
use parley_core::{Result, SessionError};
use serde_json::{Map, Value};

const MESSAGE_ID_KEYS: &[&str] = &["message_id", "messageId", "id"];
const CONTENT_KEYS: &[&str] = &["content", "chunk", "delta", "text"];
const CHAT_ID_KEYS: &[&str] = &["chat_id", "chatId"];
const CLIENT_MESSAGE_ID_KEYS: &[&str] = &[
    "client_message_id",
    "clientMessageId",
    "temp_id",
    "tempId",
];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "ts"];
const SEQUENCE_KEYS: &[&str] = &["sequence", "seq", "chunk_index", "index"];

/// Resolve a wire type name to its canonical kind.
///
/// Matching ignores case and treats `-` and `.` like `_`. Returns `None` for
/// names this client does not know.
pub fn resolve_kind(wire_type: &str) -> Option<EventKind> {
    let name = wire_type.trim().to_lowercase().replace(['-', '.'], "_");
    let kind = match name.as_str() {
        "connection_established" | "connected" | "welcome" => EventKind::ConnectionEstablished,
        "connection_ready" | "ready" | "session_ready" => EventKind::ConnectionReady,
        "initialization_progress" | "init_progress" | "initializing" => {
            EventKind::InitializationProgress
        }
        "response_start" | "stream_start" | "assistant_start" => EventKind::ResponseStart,
        "response_chunk" | "stream_chunk" | "chunk" | "token" => EventKind::ResponseChunk,
        "response_complete" | "stream_complete" | "stream_end" | "response_end"
        | "message_complete" | "assistant_message" => EventKind::ResponseComplete,
        "message_received" | "message_ack" | "ack" => EventKind::MessageReceived,
        "processing" | "message_processing" => EventKind::Processing,
        "typing_indicator" | "typing" | "assistant_typing" => EventKind::TypingIndicator,
        "rate_limit_exceeded" | "rate_limited" | "rate_limit" => EventKind::RateLimitExceeded,
        "error" | "server_error" => EventKind::Error,
        "ping" | "heartbeat" => EventKind::Ping,
        _ => return None,
    };
    Some(kind)
}

/// Parse raw socket text into an envelope.
pub fn parse_frame(text: &str) -> Result<InboundEnvelope> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SessionError::Protocol(format!("frame is not valid JSON: {e}")))?;
    normalize_inbound(&value)
}

/// Normalize a decoded frame into a canonical envelope.
///
/// Fields nested under `data` take precedence over top-level ones. Frames
/// that are not objects or carry no string `type` are protocol errors, as
/// are known events missing a field they cannot do without (such as the
/// message id of a chunk).
pub fn normalize_inbound(raw: &Value) -> Result<InboundEnvelope> {
    let obj = raw
        .as_object()
        .ok_or_else(|| SessionError::Protocol("frame is not a JSON object".into()))?;
    let wire_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SessionError::Protocol("frame has no string `type`".into()))?
        .to_owned();

    let fields = flatten(obj);
    let chat_id = string_field(&fields, CHAT_ID_KEYS).map(ChatId::from);
    let timestamp = string_field(&fields, TIMESTAMP_KEYS);
    let sequence = SEQUENCE_KEYS
        .iter()
        .find_map(|k| fields.get(*k).and_then(Value::as_u64));

    let event = match resolve_kind(&wire_type) {
        Some(kind) => build_event(kind, &wire_type, &fields)?,
        None => SessionEvent::Other {
            event_type: wire_type.clone(),
            data: Value::Object(fields),
        },
    };

    Ok(InboundEnvelope {
        event,
        wire_type,
        chat_id,
        timestamp,
        sequence,
    })
}

fn flatten(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut fields: Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "data")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    match obj.get("data") {
        Some(Value::Object(data)) => {
            for (k, v) in data {
                let _ = fields.insert(k.clone(), v.clone());
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            let _ = fields.insert("data".into(), other.clone());
        }
    }
    fields
}

fn build_event(kind: EventKind, wire_type: &str, fields: &Map<String, Value>) -> Result<SessionEvent> {
    let required_id = || {
        string_field(fields, MESSAGE_ID_KEYS)
            .map(MessageId::from)
            .ok_or_else(|| SessionError::Protocol(format!("`{wire_type}` frame has no message id")))
    };

    let event = match kind {
        EventKind::ConnectionEstablished => SessionEvent::ConnectionEstablished {
            client_id: string_field(fields, &["client_id", "clientId"]).map(ClientId::from),
            tenant_id: string_field(fields, &["tenant_id", "tenantId"]).map(TenantId::from),
        },
        EventKind::ConnectionReady => SessionEvent::ConnectionReady,
        EventKind::InitializationProgress => SessionEvent::InitializationProgress {
            phase: string_field(fields, &["phase", "stage", "status"])
                .unwrap_or_else(|| "initializing".into()),
            message: string_field(fields, &["message"]),
        },
        EventKind::ResponseStart => SessionEvent::ResponseStart {
            message_id: required_id()?,
        },
        EventKind::ResponseChunk => SessionEvent::ResponseChunk {
            message_id: required_id()?,
            content: string_field(fields, CONTENT_KEYS).unwrap_or_default(),
        },
        EventKind::ResponseComplete => SessionEvent::ResponseComplete(ResponseComplete {
            message_id: required_id()?,
            content: string_field(fields, CONTENT_KEYS),
            metadata: metadata(fields),
        }),
        EventKind::MessageReceived => SessionEvent::MessageReceived {
            message_id: required_id()?,
            client_message_id: string_field(fields, CLIENT_MESSAGE_ID_KEYS).map(MessageId::from),
            content: string_field(fields, CONTENT_KEYS),
        },
        EventKind::Processing => SessionEvent::Processing {
            message_id: string_field(fields, MESSAGE_ID_KEYS)
                .or_else(|| string_field(fields, CLIENT_MESSAGE_ID_KEYS))
                .map(MessageId::from),
        },
        EventKind::TypingIndicator => SessionEvent::TypingIndicator {
            is_typing: ["is_typing", "isTyping", "typing"]
                .iter()
                .find_map(|k| fields.get(*k).and_then(Value::as_bool))
                .unwrap_or(true),
        },
        EventKind::RateLimitExceeded => SessionEvent::RateLimitExceeded {
            retry_after_ms: retry_after_ms(fields),
        },
        EventKind::Error => SessionEvent::Error {
            error_type: string_field(fields, &["type", "error_type", "errorType", "code"])
                .unwrap_or_else(|| "unknown".into()),
            message: string_field(fields, &["message", "error", "detail"])
                .unwrap_or_else(|| "unspecified server error".into()),
            message_id: string_field(fields, MESSAGE_ID_KEYS)
                .or_else(|| string_field(fields, CLIENT_MESSAGE_ID_KEYS))
                .map(MessageId::from),
        },
        EventKind::Ping => SessionEvent::Ping {
            timestamp: fields.get("timestamp").cloned().unwrap_or(Value::Null),
        },
        EventKind::Other => SessionEvent::Other {
            event_type: wire_type.to_owned(),
            data: Value::Object(fields.clone()),
        },
    };
    Ok(event)
}

/// First present key rendered as a string. Numbers are accepted and
/// stringified; empty strings count as absent.
fn string_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match fields.get(*k) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn u64_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| fields.get(*k).and_then(Value::as_u64))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn retry_after_ms(fields: &Map<String, Value>) -> Option<u64> {
    if let Some(ms) = u64_field(fields, &["retry_after_ms", "retryAfterMs"]) {
        return Some(ms);
    }
    match ["retry_after", "retryAfter"].iter().find_map(|k| fields.get(*k))? {
        Value::Number(n) => n
            .as_f64()
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(|s| (s * 1000.0).round() as u64),
        Value::String(s) => parse_retry_after(s),
        _ => None,
    }
}

fn metadata(fields: &Map<String, Value>) -> MessageMetadata {
    // Some deployments nest response metadata; top-level keys win.
    let nested = fields.get("metadata").and_then(Value::as_object);
    let lookup = |keys: &[&str]| -> Option<Value> {
        keys.iter()
            .find_map(|k| fields.get(*k))
            .or_else(|| nested.and_then(|m| keys.iter().find_map(|k| m.get(*k))))
            .cloned()
    };

    let sources = lookup(&["sources", "citations"])
        .and_then(|v| serde_json::from_value::<Vec<Source>>(v).ok())
        .unwrap_or_default();

    MessageMetadata {
        model: lookup(&["model"]).and_then(|v| v.as_str().map(str::to_owned)),
        total_tokens: lookup(&["total_tokens", "totalTokens", "tokens"]).and_then(|v| v.as_u64()),
        cost_estimate: lookup(&["cost_estimate", "costEstimate", "cost"]).and_then(|v| v.as_f64()),
        response_time_ms: lookup(&["response_time_ms", "responseTimeMs", "response_time"])
            .and_then(|v| v.as_u64()),
        sources,
        failure_reason: None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn envelope_shape() {
        let env = normalize_inbound(&json!({
            "type": "response_chunk",
            "data": {"message_id": "m1", "content": "Hel", "chat_id": "c1", "sequence": 0}
        }))
        .unwrap();
        assert_eq!(env.wire_type, "response_chunk");
        assert_eq!(env.chat_id.as_deref(), Some("c1"));
        assert_eq!(env.sequence, Some(0));
        assert_matches!(
            env.event,
            SessionEvent::ResponseChunk { ref message_id, ref content }
                if message_id.as_str() == "m1" && content == "Hel"
        );
    }

    #[test]
    fn flattened_shape_with_aliases() {
        let env = normalize_inbound(&json!({
            "type": "stream_chunk",
            "messageId": "m2",
            "delta": "lo",
            "chatId": "c9"
        }))
        .unwrap();
        assert_eq!(env.event.kind(), EventKind::ResponseChunk);
        assert_eq!(env.event.content(), Some("lo"));
        assert_eq!(env.chat_id.as_deref(), Some("c9"));
    }

    #[test]
    fn type_alias_table() {
        let cases = [
            ("welcome", EventKind::ConnectionEstablished),
            ("session_ready", EventKind::ConnectionReady),
            ("init_progress", EventKind::InitializationProgress),
            ("assistant_start", EventKind::ResponseStart),
            ("token", EventKind::ResponseChunk),
            ("stream_end", EventKind::ResponseComplete),
            ("assistant_message", EventKind::ResponseComplete),
            ("message_ack", EventKind::MessageReceived),
            ("message_processing", EventKind::Processing),
            ("assistant_typing", EventKind::TypingIndicator),
            ("rate_limited", EventKind::RateLimitExceeded),
            ("server_error", EventKind::Error),
            ("heartbeat", EventKind::Ping),
        ];
        for (wire, kind) in cases {
            assert_eq!(resolve_kind(wire), Some(kind), "{wire}");
        }
    }

    #[test]
    fn type_matching_ignores_case_and_separators() {
        assert_eq!(resolve_kind("Response.Chunk"), Some(EventKind::ResponseChunk));
        assert_eq!(resolve_kind("message-received"), Some(EventKind::MessageReceived));
        assert_eq!(resolve_kind("weather_report"), None);
    }

    #[test]
    fn unknown_type_keeps_its_name() {
        let env = normalize_inbound(&json!({"type": "widget_update", "data": {"x": 1}})).unwrap();
        assert_matches!(env.event, SessionEvent::Other { ref event_type, ref data }
            if event_type == "widget_update" && data["x"] == 1);
        assert_eq!(env.event.name(), "widget_update");
    }

    #[test]
    fn non_object_is_protocol_error() {
        let err = normalize_inbound(&json!([1, 2])).unwrap_err();
        assert_matches!(err, SessionError::Protocol(_));
    }

    #[test]
    fn missing_type_is_protocol_error() {
        let err = normalize_inbound(&json!({"data": {}})).unwrap_err();
        assert_matches!(err, SessionError::Protocol(ref m) if m.contains("type"));
        let err = normalize_inbound(&json!({"type": 7})).unwrap_err();
        assert_matches!(err, SessionError::Protocol(_));
    }

    #[test]
    fn chunk_without_message_id_is_protocol_error() {
        let err = normalize_inbound(&json!({"type": "response_chunk", "data": {"content": "x"}}))
            .unwrap_err();
        assert_matches!(err, SessionError::Protocol(ref m) if m.contains("message id"));
    }

    #[test]
    fn parse_frame_rejects_invalid_json() {
        assert_matches!(parse_frame("{not json"), Err(SessionError::Protocol(_)));
    }

    #[test]
    fn completion_metadata() {
        let env = normalize_inbound(&json!({
            "type": "response_complete",
            "data": {
                "message_id": "m1",
                "total_tokens": 42,
                "cost_estimate": 0.002,
                "model": "gpt-x",
                "response_time_ms": 850,
                "sources": [{"title": "Docs", "url": "https://example.com"}]
            }
        }))
        .unwrap();
        let SessionEvent::ResponseComplete(done) = env.event else {
            panic!("expected completion");
        };
        assert_eq!(done.content, None);
        assert_eq!(done.metadata.total_tokens, Some(42));
        assert_eq!(done.metadata.model.as_deref(), Some("gpt-x"));
        assert_eq!(done.metadata.response_time_ms, Some(850));
        assert_eq!(done.metadata.sources.len(), 1);
        assert_eq!(done.metadata.sources[0].title.as_deref(), Some("Docs"));
    }

    #[test]
    fn nested_metadata_is_read() {
        let env = normalize_inbound(&json!({
            "type": "response_complete",
            "data": {"id": "m1", "text": "done", "metadata": {"totalTokens": 7}}
        }))
        .unwrap();
        let SessionEvent::ResponseComplete(done) = env.event else {
            panic!("expected completion");
        };
        assert_eq!(done.content.as_deref(), Some("done"));
        assert_eq!(done.metadata.total_tokens, Some(7));
    }

    #[test]
    fn ack_with_temp_id_alias() {
        let env = normalize_inbound(&json!({
            "type": "message_received",
            "data": {"message_id": "srv-1", "tempId": "temp_abc"}
        }))
        .unwrap();
        assert_matches!(env.event, SessionEvent::MessageReceived { ref message_id, ref client_message_id, .. }
            if message_id.as_str() == "srv-1"
                && client_message_id.as_ref().map(MessageId::as_str) == Some("temp_abc"));
    }

    #[test]
    fn rate_limit_seconds_and_millis() {
        let env = normalize_inbound(&json!({"type": "rate_limit_exceeded", "data": {"retry_after": 5}}))
            .unwrap();
        assert_eq!(env.event, SessionEvent::RateLimitExceeded { retry_after_ms: Some(5000) });

        let env = normalize_inbound(&json!({"type": "rate_limit", "retryAfter": "1.5"})).unwrap();
        assert_eq!(env.event, SessionEvent::RateLimitExceeded { retry_after_ms: Some(1500) });

        let env = normalize_inbound(&json!({"type": "rate_limited", "retry_after_ms": 250})).unwrap();
        assert_eq!(env.event, SessionEvent::RateLimitExceeded { retry_after_ms: Some(250) });

        let env = normalize_inbound(&json!({"type": "rate_limited"})).unwrap();
        assert_eq!(env.event, SessionEvent::RateLimitExceeded { retry_after_ms: None });
    }

    #[test]
    fn error_frame_uses_nested_type() {
        let env = normalize_inbound(&json!({
            "type": "error",
            "data": {"type": "message_failed", "message": "boom", "message_id": "temp_1"}
        }))
        .unwrap();
        assert_matches!(env.event, SessionEvent::Error { ref error_type, ref message, ref message_id }
            if error_type == "message_failed"
                && message == "boom"
                && message_id.as_ref().map(MessageId::as_str) == Some("temp_1"));
    }

    #[test]
    fn ping_timestamp_kept_verbatim() {
        let env = normalize_inbound(&json!({"type": "ping", "data": {"timestamp": 1_700_000_000_123_u64}}))
            .unwrap();
        assert_eq!(env.event, SessionEvent::Ping { timestamp: json!(1_700_000_000_123_u64) });
        assert_eq!(env.timestamp.as_deref(), Some("1700000000123"));
    }

    #[test]
    fn typing_indicator_defaults_to_typing() {
        let env = normalize_inbound(&json!({"type": "typing"})).unwrap();
        assert_eq!(env.event, SessionEvent::TypingIndicator { is_typing: true });
        let env = normalize_inbound(&json!({"type": "typing_indicator", "data": {"isTyping": false}}))
            .unwrap();
        assert_eq!(env.event, SessionEvent::TypingIndicator { is_typing: false });
    }

    #[test]
    fn established_captures_client_id() {
        let env = normalize_inbound(&json!({
            "type": "connection_established",
            "data": {"client_id": "cl-1", "tenant_id": "acme"}
        }))
        .unwrap();
        assert_matches!(env.event, SessionEvent::ConnectionEstablished { ref client_id, ref tenant_id }
            if client_id.as_deref() == Some("cl-1") && tenant_id.as_deref() == Some("acme"));
    }

    #[test]
    fn data_fields_override_top_level() {
        let env = normalize_inbound(&json!({
            "type": "response_chunk",
            "message_id": "outer",
            "data": {"message_id": "inner", "content": "x"}
        }))
        .unwrap();
        assert_eq!(env.event.message_id().map(MessageId::as_str), Some("inner"));
    }
}
