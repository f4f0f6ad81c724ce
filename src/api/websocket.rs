//! WebSocket handler for a client's conversation
//!
//! Each connection runs at most one turn at a time. New text input or an
//! interrupt signal cancels the running turn and waits until its synthesis
//! tasks and sender have stopped, so a new turn never shares the socket with
//! leftovers of the old one.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ApiState;
use crate::conversation::{run_turn, ConversationContext};
use crate::pipeline::{ChannelTransport, Transport};

/// Capacity of the per-connection outbound queue
const OUTBOUND_CAPACITY: usize = 64;

/// Incoming WebSocket message from client
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WsIncoming {
    /// Start a turn with typed input
    TextInput { text: String },
    /// Stop the running turn
    InterruptSignal {
        /// Portion of the reply the client managed to hear
        #[serde(default)]
        text: Option<String>,
    },
    /// Keep the connection alive
    Ping,
}

/// Connection-level frames; turn frames come from the conversation module
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WsOutgoing {
    /// Sent once after the upgrade
    SetClientUid { client_uid: String },
    /// Reply to [`WsIncoming::Ping`]
    Pong,
    /// Malformed or unsupported client message
    Error { message: String },
}

struct RunningTurn {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The connection's running turn, cancelled when replaced or dropped
#[derive(Default)]
struct ActiveTurn(Option<RunningTurn>);

impl ActiveTurn {
    /// Cancel the running turn and wait until it has torn down
    async fn interrupt(&mut self) {
        let Some(RunningTurn { cancel, handle }) = self.0.take() else {
            return;
        };
        if !handle.is_finished() {
            tracing::info!("interrupting active conversation turn");
        }
        cancel.cancel();
        if let Err(e) = handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "conversation turn panicked");
            }
        }
    }

    async fn start(&mut self, ctx: ConversationContext, transport: Arc<dyn Transport>, text: String) {
        self.interrupt().await;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            // failures were already reported to the client as an error frame
            let _ = run_turn(&ctx, transport, &text, &token).await;
        });
        self.0 = Some(RunningTurn { cancel, handle });
    }
}

impl Drop for ActiveTurn {
    fn drop(&mut self) {
        // the turn unwinds on its own once it sees the token
        if let Some(running) = self.0.take() {
            running.cancel.cancel();
        }
    }
}

/// Build WebSocket router
pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/client-ws", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ApiState>) {
    let (mut sender, mut receiver) = socket.split();
    let client_uid = uuid::Uuid::new_v4().to_string();

    let hello = WsOutgoing::SetClientUid {
        client_uid: client_uid.clone(),
    };
    if let Ok(msg) = serde_json::to_string(&hello) {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            return;
        }
    }

    tracing::info!(client_uid = %client_uid, "WebSocket connected");

    // Turns and connection frames share one ordered outbound queue
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    let transport: Arc<dyn Transport> = Arc::new(ChannelTransport::new(tx.clone()));

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let uid = client_uid.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut turn = ActiveTurn::default();

        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<WsIncoming>(text.as_str()) {
                    Ok(WsIncoming::TextInput { text }) => {
                        turn.start(state.context.clone(), Arc::clone(&transport), text)
                            .await;
                    }
                    Ok(WsIncoming::InterruptSignal { text }) => {
                        tracing::info!(client_uid = %uid, heard = ?text, "interrupt signal");
                        turn.interrupt().await;
                    }
                    Ok(WsIncoming::Ping) => reply(&tx, &WsOutgoing::Pong).await,
                    Err(e) => {
                        tracing::warn!(client_uid = %uid, error = %e, "unrecognized client message");
                        reply(
                            &tx,
                            &WsOutgoing::Error {
                                message: format!("invalid message: {e}"),
                            },
                        )
                        .await;
                    }
                },
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received ping");
                }
                Message::Close(_) => {
                    tracing::info!(client_uid = %uid, "WebSocket closed by client");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    tracing::info!(client_uid = %client_uid, "WebSocket disconnected");
}

async fn reply(tx: &mpsc::Sender<String>, frame: &WsOutgoing) {
    if let Ok(text) = serde_json::to_string(frame) {
        let _ = tx.send(text).await;
    }
}
