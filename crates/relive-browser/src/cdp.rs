//! Low-level CDP (Chrome DevTools Protocol) WebSocket client.
//!
//! Connects to a DevTools endpoint (browser-level or page-level) and
//! provides JSON-RPC command/response correlation plus an event stream.
//!
//! Commands are sent with auto-incrementing ids; a background reader task
//! routes responses back to their callers and forwards events into an
//! unbounded channel. The event receiver is takeable exactly once — the
//! state machines hand it to their event pump, and the channel closing is
//! the disconnect signal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::BrowserError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingMap = HashMap<u64, oneshot::Sender<CdpResponse>>;

/// Default per-command response timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A CDP event received from the browser.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    /// Event method name, e.g. `"Runtime.bindingCalled"`.
    pub method: String,
    /// Event parameters (null when absent).
    pub params: Value,
}

#[derive(Debug, serde::Serialize)]
struct CdpCommand<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

/// A correlated CDP response.
#[derive(Debug)]
struct CdpResponse {
    result: Option<Value>,
    error: Option<CdpResponseError>,
}

#[derive(Debug, serde::Deserialize)]
struct CdpResponseError {
    code: i64,
    message: String,
    data: Option<String>,
}

/// CDP client over one DevTools WebSocket connection.
pub struct CdpClient {
    next_id: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
    writer: Arc<Mutex<WsSink>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<CdpEvent>>>,
    connected: Arc<AtomicBool>,
    _reader: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for CdpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdpClient")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint
    /// (`ws://127.0.0.1:{port}/devtools/{browser|page}/{id}`).
    pub async fn connect(ws_url: &str) -> Result<Self, BrowserError> {
        tracing::debug!(url = ws_url, "connecting to DevTools endpoint");

        let (stream, _) = tokio_tungstenite::connect_async(ws_url).await.map_err(|e| {
            BrowserError::ConnectionFailed {
                url: ws_url.to_string(),
                reason: e.to_string(),
            }
        })?;
        let (writer, reader) = stream.split();

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_pending = Arc::clone(&pending);
        let reader_connected = Arc::clone(&connected);
        let reader_handle = tokio::spawn(async move {
            read_loop(reader, reader_pending, event_tx, reader_connected).await;
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Arc::new(Mutex::new(writer)),
            events: Mutex::new(Some(event_rx)),
            connected,
            _reader: reader_handle,
        })
    }

    /// Whether the WebSocket is still up. Goes false permanently once the
    /// reader loop exits.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Take the event stream. Yields `None` after the connection drops.
    ///
    /// May be called once; subsequent calls return `None`.
    pub async fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<CdpEvent>> {
        self.events.lock().await.take()
    }

    /// Send a CDP command and wait for its result with the default timeout.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.send_command_with_timeout(method, params, DEFAULT_COMMAND_TIMEOUT)
            .await
    }

    /// Send a CDP command with an explicit response timeout.
    pub async fn send_command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, BrowserError> {
        if !self.is_connected() {
            return Err(BrowserError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&CdpCommand { id, method, params }).map_err(|e| {
            BrowserError::Protocol {
                detail: format!("failed to serialize command: {e}"),
            }
        })?;

        tracing::trace!(id, method, "sending CDP command");

        // Register before sending so a fast response cannot race the map.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let send_result = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(json.into())).await
        };
        if let Err(e) = send_result {
            self.pending.lock().await.remove(&id);
            return Err(BrowserError::Protocol {
                detail: format!("failed to send WebSocket message: {e}"),
            });
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            // Sender dropped: the reader loop exited with the command in flight.
            Ok(Err(_)) => return Err(BrowserError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(BrowserError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        if let Some(err) = response.error {
            return Err(BrowserError::Cdp {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// Enable a CDP domain (`Page`, `Runtime`, `Network`, `DOM`, ...).
    pub async fn enable_domain(&self, domain: &str) -> Result<(), BrowserError> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Best-effort close of the WebSocket. The reader loop winds down on its
    /// own once the socket drops.
    pub async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Message::Close(None)).await;
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// Reader task: routes responses to pending callers and events to the
/// channel. On exit, pending callers see their oneshot senders dropped
/// (mapped to [`BrowserError::Disconnected`]) and the event channel closes.
async fn read_loop(
    mut reader: WsSource,
    pending: Arc<Mutex<PendingMap>>,
    event_tx: mpsc::UnboundedSender<CdpEvent>,
    connected: Arc<AtomicBool>,
) {
    while let Some(message) = reader.next().await {
        let text = match message {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Binary(b)) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                tracing::debug!("DevTools WebSocket closed by remote");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "DevTools WebSocket read error");
                break;
            }
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable CDP message");
                continue;
            }
        };

        if let Some(id) = json.get("id").and_then(Value::as_u64) {
            let response = CdpResponse {
                result: json.get("result").cloned(),
                error: json
                    .get("error")
                    .and_then(|e| serde_json::from_value(e.clone()).ok()),
            };
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(response);
            } else {
                tracing::trace!(id, "response for unknown command id");
            }
        } else if let Some(method) = json.get("method").and_then(Value::as_str) {
            let event = CdpEvent {
                method: method.to_string(),
                params: json.get("params").cloned().unwrap_or(Value::Null),
            };
            // Nobody listening is fine; the event is dropped.
            let _ = event_tx.send(event);
        }
    }

    connected.store(false, Ordering::SeqCst);
    // Dropping the senders fails every in-flight command as Disconnected.
    pending.lock().await.clear();
}

/// Split a CDP message into an event, if it is one (has `method`, no `id`).
pub fn parse_event(json: &Value) -> Option<CdpEvent> {
    if json.get("id").is_some() {
        return None;
    }
    Some(CdpEvent {
        method: json.get("method")?.as_str()?.to_string(),
        params: json.get("params").cloned().unwrap_or(Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_serializes_as_json_rpc() {
        let cmd = CdpCommand {
            id: 7,
            method: "Runtime.evaluate",
            params: json!({ "expression": "1 + 1", "returnByValue": true }),
        };
        let value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "Runtime.evaluate");
        assert_eq!(value["params"]["expression"], "1 + 1");
    }

    #[test]
    fn parse_event_accepts_events() {
        let json = json!({
            "method": "Runtime.bindingCalled",
            "params": { "name": "u4arecEmit", "payload": "{}" }
        });
        let event = parse_event(&json).unwrap();
        assert_eq!(event.method, "Runtime.bindingCalled");
        assert_eq!(event.params["name"], "u4arecEmit");
    }

    #[test]
    fn parse_event_rejects_responses() {
        let json = json!({ "id": 3, "result": {} });
        assert!(parse_event(&json).is_none());
    }

    #[test]
    fn parse_event_defaults_missing_params_to_null() {
        let json = json!({ "method": "Page.loadEventFired" });
        let event = parse_event(&json).unwrap();
        assert_eq!(event.params, Value::Null);
    }

    #[test]
    fn response_error_deserializes() {
        let err: CdpResponseError =
            serde_json::from_str(r#"{"code": -32601, "message": "Method not found"}"#).unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
        assert!(err.data.is_none());
    }
}
