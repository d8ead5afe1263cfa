//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It feeds client frames and auth notices to the connection's `SessionDriver`
//! and forwards the driver's outbox to the socket.

use crate::web::{
    middleware::AuthSessionId,
    protocol::ServerMessage,
    session_driver::SessionDriver,
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Extension(AuthSessionId(auth_session_id)): Extension<AuthSessionId>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id, auth_session_id))
}

/// Serializes outbox messages onto the socket until the outbox closes.
async fn forward_outbox(ws_sender: WsSender, mut outbox: mpsc::UnboundedReceiver<ServerMessage>) {
    while let Some(message) = outbox.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize server message: {:?}", e);
                continue;
            }
        };
        if ws_sender.lock().await.send(Message::Text(json.into())).await.is_err() {
            warn!("Failed to send message; client is gone.");
            break;
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    app_state: Arc<AppState>,
    user_id: Uuid,
    auth_session_id: String,
) {
    info!("New WebSocket connection established for user: {}", user_id);

    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));

    // Subscribe before the first screen so no notice is missed.
    let mut notices = app_state.notices.subscribe();

    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let forward_task = tokio::spawn(forward_outbox(ws_sender.clone(), outbox_rx));

    let mut driver = SessionDriver::new(app_state, user_id, auth_session_id, outbox_tx);
    driver.start().await;

    // --- Main Message Loop ---
    while !driver.is_closed() {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => driver.on_text(text.as_str()).await,
                Some(Ok(Message::Binary(data))) => driver.on_binary(data.to_vec()).await,
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {:?}", e);
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
            notice = notices.recv() => match notice {
                Ok(notice) => driver.on_notice(&notice).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Connection for {} missed {} auth notices.", user_id, skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    // --- Cleanup ---
    drop(notices);
    // Dropping the driver closes the outbox; the forwarder flushes what is left.
    drop(driver);
    if let Err(e) = forward_task.await {
        error!("Outbox forwarder failed: {:?}", e);
    }
    let _ = ws_sender.lock().await.send(Message::Close(None)).await;
    info!("WebSocket connection closed.");
}
