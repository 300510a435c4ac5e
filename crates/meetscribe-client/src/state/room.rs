use meetscribe_protocol::MemberData;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Shared view of the room for whoever presents it
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    inner: Arc<RwLock<RoomStateInner>>,
}

#[derive(Debug, Default)]
pub struct RoomStateInner {
    pub local: Option<MemberData>,
    pub room_code: Option<String>,

    // Members in arrival order, self included
    pub members: Vec<MemberData>,

    // Transcript logs in first-spoken order
    pub transcripts: Vec<TranscriptLog>,

    pub is_muted: bool,
    pub is_listening: bool,
    pub is_connected: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptLog {
    pub session_id: Uuid,
    pub name: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemberLookupError {
    #[error("{0} is not in the room")]
    NotFound(String),

    #[error("{count} members are called {name}, use a session id from `members`")]
    Ambiguous { name: String, count: usize },
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, RoomStateInner> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, RoomStateInner> {
        self.inner.write().await
    }

    pub async fn set_joining(&self, local: MemberData, room_code: &str) {
        let mut s = self.inner.write().await;
        s.local = Some(local);
        s.room_code = Some(room_code.to_string());
        s.is_connected = true;
    }

    /// Members present before us, followed by ourselves
    pub async fn set_snapshot(&self, users: &[MemberData]) {
        let mut s = self.inner.write().await;
        let mut members = users.to_vec();
        if let Some(local) = s.local.clone() {
            if !members.iter().any(|m| m.session_id == local.session_id) {
                members.push(local);
            }
        }
        s.members = members;
    }

    pub async fn add_member(&self, user: &MemberData) {
        let mut s = self.inner.write().await;
        if !s.members.iter().any(|m| m.session_id == user.session_id) {
            s.members.push(user.clone());
        }
    }

    /// Drop a departed member together with everything they said.
    pub async fn remove_member(&self, session_id: Uuid) -> Option<MemberData> {
        let mut s = self.inner.write().await;
        s.transcripts.retain(|log| log.session_id != session_id);
        let pos = s.members.iter().position(|m| m.session_id == session_id)?;
        Some(s.members.remove(pos))
    }

    pub async fn add_transcript(&self, session_id: Uuid, name: &str, text: &str) {
        let mut s = self.inner.write().await;
        match s.transcripts.iter_mut().find(|log| log.session_id == session_id) {
            Some(log) => log.lines.push(text.to_string()),
            None => s.transcripts.push(TranscriptLog {
                session_id,
                name: name.to_string(),
                lines: vec![text.to_string()],
            }),
        }
    }

    pub async fn set_muted(&self, muted: bool) {
        self.inner.write().await.is_muted = muted;
    }

    pub async fn set_listening(&self, listening: bool) {
        self.inner.write().await.is_listening = listening;
    }

    pub async fn members(&self) -> Vec<MemberData> {
        self.inner.read().await.members.clone()
    }

    pub async fn transcripts(&self) -> Vec<TranscriptLog> {
        self.inner.read().await.transcripts.clone()
    }

    /// Whole meeting, one block per speaker:
    /// `name:\nline line` blocks separated by newlines
    pub async fn full_transcript(&self) -> String {
        self.inner
            .read()
            .await
            .transcripts
            .iter()
            .map(|log| format!("{}:\n{}", log.name, log.lines.join(" ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// One speaker's name and lines, if they have said anything
    pub async fn speaker_transcript(&self, session_id: Uuid) -> Option<(String, String)> {
        let s = self.inner.read().await;
        let log = s.transcripts.iter().find(|log| log.session_id == session_id)?;
        Some((log.name.clone(), log.lines.join(" ")))
    }

    /// Resolve a display name, or a session id, to exactly one member.
    pub async fn find_member(&self, name_or_id: &str) -> Result<MemberData, MemberLookupError> {
        let s = self.inner.read().await;
        if let Ok(id) = Uuid::parse_str(name_or_id) {
            if let Some(member) = s.members.iter().find(|m| m.session_id == id) {
                return Ok(member.clone());
            }
        }

        let mut named = s.members.iter().filter(|m| m.name == name_or_id);
        match (named.next(), named.count()) {
            (Some(member), 0) => Ok(member.clone()),
            (Some(_), others) => Err(MemberLookupError::Ambiguous {
                name: name_or_id.to_string(),
                count: others + 1,
            }),
            (None, _) => Err(MemberLookupError::NotFound(name_or_id.to_string())),
        }
    }

    /// Forget the room on leave
    pub async fn clear(&self) {
        let mut s = self.inner.write().await;
        s.room_code = None;
        s.members.clear();
        s.transcripts.clear();
        s.is_listening = false;
        s.is_connected = false;
    }
}
