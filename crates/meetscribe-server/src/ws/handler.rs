use super::session::Session;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use meetscribe_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let session_id = Uuid::new_v4();
    state.relay.add_connection(session_id, tx).await;

    // Nobody else knows this id yet, so this is the first frame the client sees
    state
        .relay
        .send_to_session(session_id, &ServerMessage::Connected { session_id })
        .await;

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(session_id, state.relay.clone());
    tracing::info!("Session {} opened", session_id);

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let client_msg: ClientMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Invalid message from {}: {}", session_id, e);
                        continue;
                    }
                };

                session.handle_message(client_msg).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error for session {}: {}", session_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    session.close().await;
    send_task.abort();

    tracing::info!("Session {} closed", session_id);
}
