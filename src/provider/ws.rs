//! WebSocket JSON-RPC Provider
//!
//! Long-lived socket transport with request/response correlation by id
//! and push events mapped onto the provider event feed. The primary
//! consumer is the Frame desktop wallet, which listens on a local
//! WebSocket port.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use super::{
    normalize_chain_id, Eip1193Provider, ProviderEvent, RpcError, EVENT_CHANNEL_CAPACITY,
};

/// Default time to wait for a response before giving up on a request
pub const DEFAULT_WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Keepalive ping period
const PING_INTERVAL_SECS: u64 = 20;
/// Outgoing command queue depth
const COMMAND_CHANNEL_CAPACITY: usize = 32;

struct PendingRequest {
    id: u64,
    payload: String,
    respond: oneshot::Sender<Result<Value, RpcError>>,
}

enum PumpCommand {
    Request(PendingRequest),
    /// Forget a request whose caller stopped waiting
    Cancel(u64),
    /// Close the socket and end the pump
    Shutdown,
}

/// WebSocket JSON-RPC transport
#[derive(Debug)]
pub struct WsProvider {
    url: String,
    commands: mpsc::Sender<PumpCommand>,
    events: broadcast::Sender<ProviderEvent>,
    request_id: AtomicU64,
    request_timeout: Duration,
}

impl WsProvider {
    /// Open the socket and spawn the read/write pump. Fails fast when
    /// nothing listens on the endpoint.
    pub async fn connect(url: &str) -> Result<Self, RpcError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| RpcError::transport(format!("websocket connect to {url} failed: {e}")))?;
        debug!("WebSocket connected to {}", url);

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tokio::spawn(run_pump(stream, commands_rx, events_tx.clone()));

        Ok(Self {
            url: url.to_string(),
            commands: commands_tx,
            events: events_tx,
            request_id: AtomicU64::new(1),
            request_timeout: DEFAULT_WS_REQUEST_TIMEOUT,
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Eip1193Provider for WsProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();
        debug!("WS -> {} (id {})", method, id);

        let (respond, response) = oneshot::channel();
        self.commands
            .send(PumpCommand::Request(PendingRequest { id, payload, respond }))
            .await
            .map_err(|_| RpcError::transport("websocket connection closed"))?;

        match tokio::time::timeout(self.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::transport("websocket connection closed")),
            Err(_) => {
                // Reap the pump-side slot; the reply may never come.
                let _ = self.commands.try_send(PumpCommand::Cancel(id));
                Err(RpcError::transport(format!(
                    "request {method} timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    async fn disconnect(&self) -> Result<(), RpcError> {
        // A pump that is already gone counts as disconnected.
        let _ = self.commands.send(PumpCommand::Shutdown).await;
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }
}

// =========================================================================
// Socket Pump
// =========================================================================

async fn run_pump(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut commands: mpsc::Receiver<PumpCommand>,
    events: broadcast::Sender<ProviderEvent>,
) {
    let (mut ws_write, mut ws_read) = stream.split();
    let mut pending: HashMap<u64, oneshot::Sender<Result<Value, RpcError>>> = HashMap::new();
    let mut ping_timer = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(PumpCommand::Request(request)) => {
                        if let Err(e) = ws_write.send(Message::Text(request.payload)).await {
                            warn!("WebSocket send failed: {}", e);
                            let _ = request.respond.send(Err(RpcError::transport(
                                format!("websocket send failed: {e}"),
                            )));
                            break;
                        }
                        pending.insert(request.id, request.respond);
                    }
                    Some(PumpCommand::Cancel(id)) => {
                        pending.remove(&id);
                    }
                    Some(PumpCommand::Shutdown) => {
                        debug!("WebSocket disconnect requested");
                        let _ = ws_write.send(Message::Close(None)).await;
                        break;
                    }
                    // All provider handles dropped.
                    None => break,
                }
            }
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, &mut pending, &events);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("WebSocket read error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
            _ = ping_timer.tick() => {
                if let Err(e) = ws_write.send(Message::Ping(vec![])).await {
                    warn!("WebSocket ping failed: {}", e);
                    break;
                }
            }
        }
    }

    // Fail whatever was still in flight and tell subscribers the
    // transport is gone.
    for (_, respond) in pending.drain() {
        let _ = respond.send(Err(RpcError::transport("websocket connection closed")));
    }
    let _ = events.send(ProviderEvent::Disconnect(RpcError::new(
        RpcError::DISCONNECTED,
        "websocket disconnected",
    )));
}

/// Route one inbound frame: responses go to their waiting request,
/// id-less frames are provider notifications.
fn handle_frame(
    text: &str,
    pending: &mut HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>,
    events: &broadcast::Sender<ProviderEvent>,
) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Discarding unparseable websocket frame: {}", e);
            return;
        }
    };

    if let Some(id) = frame.get("id").and_then(Value::as_u64) {
        let Some(respond) = pending.remove(&id) else {
            debug!("Response for unknown request id {}", id);
            return;
        };
        let result = if let Some(err) = frame.get("error") {
            Err(RpcError::from_json(err))
        } else {
            Ok(frame.get("result").cloned().unwrap_or(Value::Null))
        };
        let _ = respond.send(result);
        return;
    }

    if let Some(event) = notification_to_event(&frame) {
        let _ = events.send(event);
    }
}

/// Map a JSON-RPC notification onto the provider event set
fn notification_to_event(frame: &Value) -> Option<ProviderEvent> {
    let method = frame.get("method")?.as_str()?;
    let params = frame.get("params").cloned().unwrap_or(Value::Null);

    match method {
        "accountsChanged" => {
            // Either ["0x..", ...] or [["0x..", ...]] depending on the wallet.
            let list = match &params {
                Value::Array(items) if items.len() == 1 && items[0].is_array() => {
                    items[0].as_array().cloned().unwrap_or_default()
                }
                Value::Array(items) => items.clone(),
                _ => vec![],
            };
            let accounts = list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
            Some(ProviderEvent::AccountsChanged(accounts))
        }
        "chainChanged" | "networkChanged" => {
            let raw = match &params {
                Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
                other => other.clone(),
            };
            // Keep only payloads that actually parse as a chain id.
            normalize_chain_id(&raw).ok().map(|_| ProviderEvent::ChainChanged(raw))
        }
        "disconnect" | "close" => Some(ProviderEvent::Disconnect(RpcError::new(
            RpcError::DISCONNECTED,
            "provider reported disconnect",
        ))),
        other => Some(ProviderEvent::Message {
            kind: other.to_string(),
            data: params,
        }),
    }
}
