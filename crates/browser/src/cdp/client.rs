//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. Single WebSocket per browser connection (no per-session WS overhead)
//! 2. Async message passing - no locks on the receive path
//! 3. Request/response matching via ID, events fanned out to subscribers
//! 4. Fail fast - no retries, no queuing. Let the caller decide.

use dashmap::DashMap;
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::*;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CDP protocol error: {code} - {message}")]
    Protocol { code: i32, message: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Connection closed")]
    Closed,
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

/// Event subscriber callback
pub type EventCallback = Arc<dyn Fn(CDPEvent) + Send + Sync>;

/// CDP Client - manages single WebSocket connection to browser
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: AtomicU64,

    /// Pending requests waiting for responses
    /// Key: request_id, Value: oneshot sender for response
    pending: Arc<DashMap<RequestId, oneshot::Sender<CDPResponse>>>,

    /// Event subscribers
    /// Key: method name (e.g., "Page.loadEventFired"), Value: callbacks
    subscribers: Arc<DashMap<String, Vec<EventCallback>>>,

    /// WebSocket write half (wrapped for concurrent sending)
    ws_sink: Arc<RwLock<WsSink>>,

    /// Set once the read loop has exited
    closed: AtomicBool,
}

impl CDPClient {
    /// Connect to Chrome DevTools Protocol endpoint
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (ws_stream, _) = connect_async(ws_url).await?;
        let (sink, mut stream) = ws_stream.split();

        let client = Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            subscribers: Arc::new(DashMap::new()),
            ws_sink: Arc::new(RwLock::new(sink)),
            closed: AtomicBool::new(false),
        });

        // The read loop only holds a weak reference so dropping the client ends it
        let weak = Arc::downgrade(&client);
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                let Some(client) = weak.upgrade() else {
                    break;
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Err(e) = client.handle_message(&text) {
                            tracing::error!("Failed to handle message: {}", e);
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            // Dropping the senders fails every waiter with `Closed`
            if let Some(client) = weak.upgrade() {
                client.closed.store(true, Ordering::SeqCst);
                client.pending.clear();
            }
        });

        tracing::debug!("Connected to {}", ws_url);
        Ok(client)
    }

    /// Send CDP request and wait for response
    pub async fn send_request(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(CDPError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CDPRequest {
            id,
            method: method.into(),
            params,
            session_id,
        };
        tracing::debug!(id, method = %request.method, "CDP request");

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        // Serialize and send
        let json = serde_json::to_string(&request)?;
        let mut sink = self.ws_sink.write().await;
        if let Err(e) = sink.send(Message::Text(json)).await {
            self.pending.remove(&id);
            return Err(CDPError::WebSocket(e));
        }
        drop(sink); // Release lock immediately

        // Wait for response
        let response = rx.await.map_err(|_| CDPError::Closed)?;

        if let Some(error) = response.error {
            return Err(CDPError::Protocol {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(Value::Null))
    }

    /// `send_request` bounded by a deadline
    pub async fn send_request_timeout(
        &self,
        method: impl Into<String>,
        params: Option<Value>,
        session_id: Option<SessionId>,
        timeout: Duration,
    ) -> Result<Value> {
        let method = method.into();
        match tokio::time::timeout(timeout, self.send_request(method.clone(), params, session_id))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CDPError::Timeout(method)),
        }
    }

    /// Subscribe to CDP events
    pub fn subscribe(&self, method: impl Into<String>, callback: EventCallback) {
        let method = method.into();
        self.subscribers
            .entry(method)
            .or_insert_with(Vec::new)
            .push(callback);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Handle incoming WebSocket message
    fn handle_message(&self, text: &str) -> Result<()> {
        let msg: CDPMessage = serde_json::from_str(text)?;

        match msg {
            CDPMessage::Response(response) => {
                if let Some((_, tx)) = self.pending.remove(&response.id) {
                    let _ = tx.send(response); // Receiver dropped after a timeout
                } else {
                    tracing::warn!("Received response for unknown request: {}", response.id);
                }
            }
            CDPMessage::Event(event) => {
                tracing::trace!(method = %event.method, "CDP event");
                if let Some(subscribers) = self.subscribers.get(&event.method) {
                    for callback in subscribers.value() {
                        callback(event.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Close connection gracefully
    pub async fn close(self: Arc<Self>) -> Result<()> {
        let mut sink = self.ws_sink.write().await;
        sink.close().await?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
