//! Message channel: `/message` WebSocket clients and broadcasts
//!
//! Broadcasts are fire-and-forget. Each client has its own bounded queue, so
//! a slow or dead client never delays delivery to the others; clients whose
//! queue is closed are dropped from the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use expod_core::prelude::*;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Version field of broadcast frames
pub const MESSAGE_PROTOCOL_VERSION: u8 = 2;

/// Queue depth per client
const CLIENT_QUEUE: usize = 64;

type ClientRegistry = Arc<RwLock<HashMap<usize, mpsc::Sender<String>>>>;

/// Connected message clients
#[derive(Debug, Default)]
pub struct MessageSocket {
    clients: ClientRegistry,
    next_client_id: AtomicUsize,
}

/// `{"version":2,"method":…,"params":…}`
pub fn frame(method: &str, params: &Value) -> String {
    json!({
        "version": MESSAGE_PROTOCOL_VERSION,
        "method": method,
        "params": params,
    })
    .to_string()
}

impl MessageSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client and get the receiving end of its queue
    pub fn register_client(&self) -> (usize, mpsc::Receiver<String>) {
        let id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        (id, rx)
    }

    pub fn unregister_client(&self, id: usize) {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Queue `method`/`params` for every client. Returns how many accepted it.
    pub fn broadcast(&self, method: &str, params: &Value) -> usize {
        let message = frame(method, params);
        let clients = self.clients.read().unwrap_or_else(|e| e.into_inner()).clone();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in clients {
            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Message client {} is not keeping up, dropping {}", id, method);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        for id in closed {
            self.unregister_client(id);
        }
        delivered
    }

    /// Drop every client; their connections close once their queues drain
    pub fn close_all(&self) {
        self.clients
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

/// `GET /message` upgrade handler
pub async fn message_handler(
    ws: WebSocketUpgrade,
    State(socket): State<Arc<MessageSocket>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |connection| handle_connection(connection, socket))
}

async fn handle_connection(connection: WebSocket, socket: Arc<MessageSocket>) {
    let (id, mut rx) = socket.register_client();
    let (mut sender, mut receiver) = connection.split();
    debug!("Message client {} connected", id);

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Message client {} error: {}", id, e);
                    break;
                }
            },
        }
    }

    socket.unregister_client(id);
    debug!("Message client {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_format() {
        let text = frame("reload", &Value::Null);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["version"], 2);
        assert_eq!(parsed["method"], "reload");
        assert!(parsed["params"].is_null());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let socket = MessageSocket::new();
        let (_a, mut rx_a) = socket.register_client();
        let (_b, mut rx_b) = socket.register_client();

        let delivered = socket.broadcast("devMenu", &json!({"open": true}));
        assert_eq!(delivered, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            let text = rx.recv().await.unwrap();
            assert!(text.contains("\"devMenu\""));
        }
    }

    #[tokio::test]
    async fn test_closed_client_does_not_block_others() {
        let socket = MessageSocket::new();
        let (_dead, dead_rx) = socket.register_client();
        let (_live, mut live_rx) = socket.register_client();
        drop(dead_rx);

        assert_eq!(socket.broadcast("reload", &Value::Null), 1);
        assert_eq!(socket.client_count(), 1);
        assert!(live_rx.recv().await.unwrap().contains("reload"));
    }

    #[tokio::test]
    async fn test_full_client_is_skipped() {
        let socket = MessageSocket::new();
        let (_slow, _slow_rx) = socket.register_client();
        let (_fast, mut fast_rx) = socket.register_client();

        for _ in 0..CLIENT_QUEUE {
            socket.broadcast("reload", &Value::Null);
            fast_rx.recv().await.unwrap();
        }

        assert_eq!(socket.broadcast("reload", &Value::Null), 1);
        assert_eq!(socket.client_count(), 2);
    }

    #[test]
    fn test_broadcast_without_clients() {
        let socket = MessageSocket::new();
        assert_eq!(socket.broadcast("reload", &Value::Null), 0);
        socket.close_all();
        assert_eq!(socket.client_count(), 0);
    }
}
