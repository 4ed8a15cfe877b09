//! Chat session creation.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::ids::{ChatId, TenantId, VisitorId};
use parley_core::{Result, SessionError};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::http::{endpoint, request_error, status_error};

/// Body of a session creation request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateSessionRequest {
    /// Client-side session identifier.
    pub session_id: String,
    /// Anonymous visitor identifier.
    pub visitor_id: VisitorId,
    /// Tenant the chat belongs to.
    pub tenant_id: TenantId,
}

/// Creates chat sessions on the backend.
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a chat and return its id.
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<ChatId>;
}

/// [`SessionService`] over `POST {base}/chat`.
pub struct HttpSessionService {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpSessionService {
    /// Create a service with its own HTTP client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(base_url, timeout, reqwest::Client::new())
    }

    /// Create a service with a shared HTTP client.
    pub fn with_client(base_url: impl Into<String>, timeout: Duration, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            client,
        }
    }
}

#[async_trait]
impl SessionService for HttpSessionService {
    #[tracing::instrument(skip_all, fields(tenant_id = %request.tenant_id))]
    async fn create_session(&self, request: &CreateSessionRequest) -> Result<ChatId> {
        const OP: &str = "create_session";
        let resp = self
            .client
            .post(endpoint(&self.base_url, "chat"))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| request_error(OP, &e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(OP, status, &headers, &body));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| SessionError::Protocol(format!("{OP}: invalid response body: {e}")))?;
        let chat_id = extract_chat_id(&body)
            .ok_or_else(|| SessionError::Protocol(format!("{OP}: response carries no chat id")))?;
        debug!(chat_id = %chat_id, "chat session created");
        Ok(chat_id)
    }
}

/// Chat id from `chat_id`, `id`, `chatId`, or `data.chat_id`.
fn extract_chat_id(body: &Value) -> Option<ChatId> {
    let candidates = [
        body.get("chat_id"),
        body.get("id"),
        body.get("chatId"),
        body.get("data").and_then(|d| d.get("chat_id")),
        body.get("data").and_then(|d| d.get("id")),
    ];
    candidates.into_iter().flatten().find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(ChatId::from(s.as_str())),
        Value::Number(n) => Some(ChatId::from_string(n.to_string())),
        _ => None,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
