//! Per-connection session lifecycle: `connecting -> joined -> left`.

use super::relay::SignalingRelay;
use meetscribe_protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined { room: String },
    Left,
}

pub struct Session {
    id: Uuid,
    state: SessionState,
    relay: Arc<SignalingRelay>,
}

impl Session {
    pub fn new(id: Uuid, relay: Arc<SignalingRelay>) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            relay,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::JoinRoom {
                room_code,
                user_name,
            } => {
                self.join(&room_code, &user_name).await;
            }
            ClientMessage::LeaveRoom => {
                self.leave().await;
            }
            ClientMessage::Signal { to, signal } => {
                self.relay.forward(self.id, to, signal).await;
            }
            ClientMessage::Transcript { text } => {
                if text.trim().is_empty() {
                    return;
                }
                if matches!(self.state, SessionState::Joined { .. }) {
                    self.relay.publish_transcript(self.id, &text).await;
                }
            }
            ClientMessage::Ping => {
                self.relay
                    .send_to_session(self.id, &ServerMessage::Pong)
                    .await;
            }
        }
    }

    async fn join(&mut self, room_code: &str, user_name: &str) {
        let error = match self.state.clone() {
            SessionState::Connecting => {
                match self.relay.join_room(self.id, room_code, user_name).await {
                    Ok(_) => {
                        self.state = SessionState::Joined {
                            room: room_code.to_string(),
                        };
                        return;
                    }
                    Err(e) => e.to_string(),
                }
            }
            SessionState::Joined { room } => format!("Already in room {}", room),
            SessionState::Left => "Session has left its room; reconnect to join again".to_string(),
        };

        tracing::warn!("Rejected join from {}: {}", self.id, error);
        self.relay
            .send_to_session(self.id, &ServerMessage::Error { message: error })
            .await;
    }

    /// Explicit leave. A session that never joined has nothing to leave.
    pub async fn leave(&mut self) {
        if let SessionState::Joined { .. } = self.state {
            self.relay.leave(self.id).await;
            self.state = SessionState::Left;
        }
    }

    /// Transport-level disconnect from any state
    pub async fn close(mut self) {
        self.leave().await;
        self.relay.remove_connection(self.id).await;
    }
}
