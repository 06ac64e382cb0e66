//! JSON-RPC 2.0 over HTTP POST, as spoken by the attendance server's
//! JSON routes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clockface_core::TransportError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Connection settings for [`RpcClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server root, e.g. "https://erp.example.com".
    pub base_url: String,
    /// Value of the `session_id` cookie for authenticated routes.
    pub session_id: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            session_id: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'static str,
    params: &'a P,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: String,
}

impl RpcErrorBody {
    /// The server's detailed message when present, else the generic one.
    fn into_error(self) -> TransportError {
        let message = match self.data {
            Some(data) if !data.message.is_empty() => data.message,
            _ => self.message,
        };
        TransportError::Rpc {
            code: self.code,
            message,
        }
    }
}

/// Thin JSON-RPC client. One HTTP request per call, no retries.
pub struct RpcClient {
    http: reqwest::Client,
    base_url: String,
    session_id: Option<String>,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session_id: config.session_id,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST `params` to `route` and decode the `result` member.
    pub async fn call<P, R>(&self, route: &str, params: &P) -> Result<R, TransportError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}{}", self.base_url, route);
        tracing::debug!(route, id, "rpc call");

        let mut request = self.http.post(&url).json(&RpcRequest {
            jsonrpc: "2.0",
            method: "call",
            params,
            id,
        });
        if let Some(session_id) = &self.session_id {
            request = request.header(reqwest::header::COOKIE, format!("session_id={session_id}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(route, id, status = status.as_u16(), "rpc call rejected");
            return Err(TransportError::Status(status.as_u16()));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if let Some(error) = body.error {
            return Err(error.into_error());
        }
        serde_json::from_value(body.result).map_err(|e| TransportError::Decode(e.to_string()))
    }
}
