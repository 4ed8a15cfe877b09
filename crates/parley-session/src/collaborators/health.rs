//! Backend readiness probe.

use std::time::Duration;

use async_trait::async_trait;
use parley_core::Result;

use super::http::{endpoint, request_error, status_error};

/// Reports whether the backend can serve requests.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok` when healthy; a classified error otherwise.
    async fn check(&self) -> Result<()>;
}

/// [`HealthProbe`] over `GET {base}/health`.
pub struct HttpHealthProbe {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpHealthProbe {
    /// Create a probe with its own HTTP client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(base_url, timeout, reqwest::Client::new())
    }

    /// Create a probe with a shared HTTP client.
    pub fn with_client(base_url: impl Into<String>, timeout: Duration, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            client,
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<()> {
        const OP: &str = "health_check";
        let resp = self
            .client
            .get(endpoint(&self.base_url, "health"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| request_error(OP, &e, self.timeout))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let headers = resp.headers().clone();
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(OP, status, &headers, &body))
    }
}
