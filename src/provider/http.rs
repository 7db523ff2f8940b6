//! HTTP JSON-RPC Provider
//!
//! Plain request/response transport over HTTP POST. Used as the
//! fallback path for local wallets that expose an HTTP port (Frame)
//! and for talking to public RPC endpoints directly. HTTP cannot push,
//! so the event feed never yields.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, instrument};

use super::{Eip1193Provider, ProviderEvent, RpcError, EVENT_CHANNEL_CAPACITY};

/// Default per-request timeout
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorObject {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// HTTP POST JSON-RPC transport
pub struct HttpProvider {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    request_id: AtomicU64,
    events: broadcast::Sender<ProviderEvent>,
}

impl HttpProvider {
    pub fn new(url: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            timeout: DEFAULT_HTTP_TIMEOUT,
            request_id: AtomicU64::new(1),
            events,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Eip1193Provider for HttpProvider {
    #[instrument(skip(self, params), fields(url = %self.url))]
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id(),
            "method": method,
            "params": params,
        });
        debug!("POST {} {}", self.url, method);

        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| RpcError::transport(format!("http request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RpcError::transport(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(RpcError::transport(format!(
                "http status {status}: {body}"
            )));
        }

        let parsed: JsonRpcResponse = serde_json::from_str(&body)
            .map_err(|e| RpcError::invalid_response(format!("malformed json-rpc response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(RpcError {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        parsed
            .result
            .ok_or_else(|| RpcError::invalid_response("response carries neither result nor error"))
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let ok: JsonRpcResponse = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#).unwrap();
        assert_eq!(ok.result, Some(json!("0x1")));
        assert!(ok.error.is_none());

        let err: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":4001,"message":"User rejected the request."}}"#,
        )
        .unwrap();
        let obj = err.error.unwrap();
        assert_eq!(obj.code, 4001);
        assert_eq!(obj.message, "User rejected the request.");
    }

    #[test]
    fn test_ids_increment() {
        let provider = HttpProvider::new("http://127.0.0.1:1248");
        assert_eq!(provider.next_id(), 1);
        assert_eq!(provider.next_id(), 2);
    }

    #[tokio::test]
    async fn test_request_against_closed_port_is_transport_error() {
        // Port 9 (discard) is a safe "nothing listens here" target.
        let provider = HttpProvider::new("http://127.0.0.1:9").with_timeout(Duration::from_millis(200));
        let err = provider.request("eth_chainId", json!([])).await.unwrap_err();
        assert_eq!(err.code, RpcError::TRANSPORT);
    }
}
