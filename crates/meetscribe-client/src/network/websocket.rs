use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use meetscribe_protocol::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

/// Connection to the signaling relay.
///
/// Outbound messages are queued to a writer task; inbound messages are
/// decoded by a reader task and handed to whoever owns the receiver
/// returned from [`RelayClient::connect`].
pub struct RelayClient {
    session_id: Uuid,
    sender: mpsc::Sender<ClientMessage>,
    writer: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl RelayClient {
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<ServerMessage>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        let (mut write, mut read) = ws_stream.split();

        // The relay announces our session id before anything else
        let session_id = match read.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ServerMessage>(text.as_str())? {
                    ServerMessage::Connected { session_id } => session_id,
                    ServerMessage::Error { message } => {
                        anyhow::bail!("Relay refused connection: {}", message)
                    }
                    other => anyhow::bail!("Unexpected first message from relay: {:?}", other),
                }
            }
            _ => anyhow::bail!("Connection closed before the relay assigned a session"),
        };
        tracing::info!("Connected to relay as session {}", session_id);

        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerMessage>(100);

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send WebSocket message");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ServerMessage>(text.as_str()) {
                            Ok(msg) => {
                                if inbound_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::warn!("Invalid message from relay: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        let tx_ping = tx.clone();
        let keepalive = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx_ping.send(ClientMessage::Ping).await.is_err() {
                    break;
                }
            }
        });

        Ok((
            Self {
                session_id,
                sender: tx,
                writer: Some(writer),
                background: vec![reader, keepalive],
            },
            inbound_rx,
        ))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn send(&self, msg: ClientMessage) {
        if self.sender.send(msg).await.is_err() {
            tracing::debug!("Relay connection is gone, message dropped");
        }
    }

    pub async fn join_room(&self, room_code: &str, user_name: &str) {
        self.send(ClientMessage::JoinRoom {
            room_code: room_code.to_string(),
            user_name: user_name.to_string(),
        })
        .await;
    }

    pub async fn leave_room(&self) {
        self.send(ClientMessage::LeaveRoom).await;
    }

    pub async fn transcript(&self, text: &str) {
        self.send(ClientMessage::Transcript {
            text: text.to_string(),
        })
        .await;
    }

    /// Flush queued messages and close the socket.
    pub async fn close(mut self) {
        for task in self.background.drain(..) {
            task.abort();
        }
        let writer = self.writer.take();
        // Dropping the sender lets the writer drain its queue and exit
        drop(self);

        if let Some(writer) = writer {
            if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
                tracing::debug!("Relay writer did not finish flushing");
            }
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        for task in &self.background {
            task.abort();
        }
        if let Some(writer) = &self.writer {
            writer.abort();
        }
    }
}
