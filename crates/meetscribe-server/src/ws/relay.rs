use crate::services::room::{Member, RoomError, RoomRegistry};
use meetscribe_protocol::{MemberData, ServerMessage};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

/// Routes events between connected sessions.
///
/// Owns the room registry behind a single lock: every membership change and
/// the notifications it triggers happen as one step, so two joins can never
/// observe the same pre-join snapshot. Delivery is fire-and-forget into each
/// session's outbound queue.
pub struct SignalingRelay {
    rooms: Mutex<RoomRegistry>,
    /// Map from session ID to outbound message queue
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(RoomRegistry::new()),
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_connection(&self, session_id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.senders.write().await.insert(session_id, sender);
        tracing::debug!("Session {} connected", session_id);
    }

    pub async fn remove_connection(&self, session_id: Uuid) {
        if self.senders.write().await.remove(&session_id).is_some() {
            tracing::debug!("Session {} disconnected", session_id);
        }
    }

    /// Admit `session_id` to `room`, send it the pre-join snapshot and tell
    /// everyone else it arrived.
    pub async fn join_room(
        &self,
        session_id: Uuid,
        room: &str,
        name: &str,
    ) -> Result<Vec<MemberData>, RoomError> {
        let mut rooms = self.rooms.lock().await;
        let existing = rooms.join(room, session_id, name)?;
        let users: Vec<MemberData> = existing.iter().map(Member::to_data).collect();

        self.send_to_session(session_id, &ServerMessage::RoomUsers { users: users.clone() })
            .await;
        self.deliver(
            existing.iter().map(|m| m.session_id),
            &ServerMessage::UserJoined {
                user: MemberData::new(session_id, name),
            },
        )
        .await;

        tracing::info!("{} ({}) joined room {}", name, session_id, room);
        Ok(users)
    }

    /// Remove `session_id` from its room, if any, and tell the remaining
    /// members it left.
    pub async fn leave(&self, session_id: Uuid) -> Option<Member> {
        let mut rooms = self.rooms.lock().await;
        let (room, member) = rooms.leave(session_id)?;

        let remaining: Vec<Uuid> = rooms.members(&room).iter().map(|m| m.session_id).collect();
        self.deliver(remaining, &ServerMessage::UserLeft { user: member.to_data() })
            .await;

        tracing::info!("{} ({}) left room {}", member.name, session_id, room);
        Some(member)
    }

    /// Deliver `message` to every member of `room` except `exclude`.
    pub async fn broadcast(&self, room: &str, message: &ServerMessage, exclude: Option<Uuid>) {
        let rooms = self.rooms.lock().await;
        let targets = rooms
            .members(room)
            .iter()
            .map(|m| m.session_id)
            .filter(|id| Some(*id) != exclude);
        self.deliver(targets, message).await;
    }

    /// Relay an opaque handshake payload to exactly one session. A target
    /// that is already gone is not an error.
    pub async fn forward(&self, from: Uuid, to: Uuid, signal: serde_json::Value) {
        if !self.senders.read().await.contains_key(&to) {
            tracing::debug!("Dropping signal from {} to departed session {}", from, to);
            return;
        }
        self.send_to_session(to, &ServerMessage::Signal { from, signal })
            .await;
    }

    /// Broadcast a transcript line to the speaker's room, stamped with the
    /// speaker's registered name. Lines from sessions outside any room are dropped.
    pub async fn publish_transcript(&self, session_id: Uuid, text: &str) {
        let rooms = self.rooms.lock().await;
        let Some(speaker) = rooms.find(session_id) else {
            tracing::debug!("Dropping transcript from session {} outside any room", session_id);
            return;
        };

        let message = ServerMessage::Transcript {
            session_id,
            from: speaker.name.clone(),
            text: text.to_string(),
        };
        let targets = rooms
            .members(&speaker.room)
            .iter()
            .map(|m| m.session_id)
            .filter(|id| *id != session_id);
        self.deliver(targets, &message).await;
    }

    pub async fn send_to_session(&self, session_id: Uuid, message: &ServerMessage) {
        self.deliver(std::iter::once(session_id), message).await;
    }

    pub async fn members(&self, room: &str) -> Vec<MemberData> {
        self.rooms
            .lock()
            .await
            .members(room)
            .iter()
            .map(Member::to_data)
            .collect()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.room_count()
    }

    async fn deliver(&self, targets: impl IntoIterator<Item = Uuid>, message: &ServerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        let senders = self.senders.read().await;
        for session_id in targets {
            if let Some(sender) = senders.get(&session_id) {
                if let Err(e) = sender.send(json.clone()) {
                    tracing::warn!("Failed to queue message for {}: {}", session_id, e);
                }
            }
        }
    }
}

impl Default for SignalingRelay {
    fn default() -> Self {
        Self::new()
    }
}
