//! Local relay for integration tests. Behaves like the collaboration server:
//! sends the current document on connect, rebroadcasts every accepted edit to
//! all clients (sender included, origin tag stripped) and broadcasts the user
//! count on join and leave.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Document {
    content: String,
    version: u64,
}

struct RelayState {
    tx: broadcast::Sender<String>,
    kick: broadcast::Sender<()>,
    document: Mutex<Document>,
    users: AtomicUsize,
    received: Mutex<Vec<Value>>,
}

pub struct Relay {
    pub endpoint: String,
    state: Arc<RelayState>,
    task: JoinHandle<()>,
}

impl Relay {
    pub async fn start() -> Relay {
        let (tx, _) = broadcast::channel(1000);
        let (kick, _) = broadcast::channel(4);
        let state = Arc::new(RelayState {
            tx,
            kick,
            document: Mutex::new(Document::default()),
            users: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/ws", get(ws_handler)).with_state(state.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Relay {
            endpoint: format!("ws://{addr}/ws"),
            state,
            task,
        }
    }

    /// Every `content_update` payload clients have sent.
    pub fn content_updates_received(&self) -> Vec<Value> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|msg| msg["type"] == "content_update")
            .map(|msg| msg["payload"].clone())
            .collect()
    }

    pub fn document(&self) -> String {
        self.state.document.lock().content.clone()
    }

    pub fn users(&self) -> usize {
        self.state.users.load(Ordering::SeqCst)
    }

    /// Drops every client socket without a close handshake.
    pub fn kick_all(&self) {
        let _ = self.state.kick.send(());
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<RelayState>) {
    // Subscribe before the greeting so no edit slips between the two.
    let mut broadcast_rx = state.tx.subscribe();
    let mut kick_rx = state.kick.subscribe();

    let greeting = {
        let doc = state.document.lock();
        json!({"type": "content_update", "payload": {"content": doc.content, "version": doc.version}})
    };
    if socket.send(Message::Text(greeting.to_string())).await.is_err() {
        return;
    }

    let count = state.users.fetch_add(1, Ordering::SeqCst) + 1;
    broadcast_count(&state, count);

    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = broadcast_rx.recv() => match msg {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                _ = kick_rx.recv() => break,
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => handle_text(&recv_state, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    let count = state.users.fetch_sub(1, Ordering::SeqCst) - 1;
    broadcast_count(&state, count);
}

fn handle_text(state: &RelayState, text: &str) {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return;
    };
    state.received.lock().push(message.clone());

    if message["type"] != "content_update" {
        return;
    }
    let Some(content) = message["payload"]["content"].as_str() else {
        return;
    };
    let version = {
        let mut doc = state.document.lock();
        doc.content = content.to_string();
        doc.version += 1;
        doc.version
    };
    let update = json!({"type": "content_update", "payload": {"content": content, "version": version}});
    let _ = state.tx.send(update.to_string());
}

fn broadcast_count(state: &RelayState, count: usize) {
    let message = json!({"type": "user_count_update", "payload": {"count": count}});
    let _ = state.tx.send(message.to_string());
}
