//! Room registry
//!
//! In-memory source of truth for who is in which room. Rooms exist only
//! while they have members: the first join creates one and the last leave
//! deletes it.

use meetscribe_protocol::MemberData;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub session_id: Uuid,
    pub name: String,
    pub room: String,
}

impl Member {
    pub fn to_data(&self) -> MemberData {
        MemberData::new(self.session_id, self.name.clone())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("Session {session_id} is already in room {room}")]
    AlreadyJoined { session_id: Uuid, room: String },

    #[error("Room code must not be empty")]
    EmptyRoomCode,
}

/// Room membership table. Not synchronized; callers hold it behind a lock so
/// that membership changes never interleave.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Vec<Member>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `session_id` to `room` and return the members that were already there.
    pub fn join(
        &mut self,
        room: &str,
        session_id: Uuid,
        name: &str,
    ) -> Result<Vec<Member>, RoomError> {
        if room.trim().is_empty() {
            return Err(RoomError::EmptyRoomCode);
        }

        if let Some(existing) = self.find(session_id) {
            return Err(RoomError::AlreadyJoined {
                session_id,
                room: existing.room.clone(),
            });
        }

        let members = self.rooms.entry(room.to_string()).or_default();
        let snapshot = members.clone();
        members.push(Member {
            session_id,
            name: name.to_string(),
            room: room.to_string(),
        });

        tracing::debug!(
            "Session {} joined room {} ({} members)",
            session_id,
            room,
            members.len()
        );

        Ok(snapshot)
    }

    /// Remove `session_id` from whichever room holds it.
    pub fn leave(&mut self, session_id: Uuid) -> Option<(String, Member)> {
        let room = self
            .rooms
            .iter()
            .find(|(_, members)| members.iter().any(|m| m.session_id == session_id))
            .map(|(room, _)| room.clone())?;

        let members = self.rooms.get_mut(&room)?;
        let idx = members.iter().position(|m| m.session_id == session_id)?;
        let member = members.remove(idx);

        if members.is_empty() {
            self.rooms.remove(&room);
            tracing::debug!("Room {} is empty, removed", room);
        }

        Some((room, member))
    }

    pub fn members(&self, room: &str) -> &[Member] {
        self.rooms.get(room).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, session_id: Uuid) -> Option<&Member> {
        self.rooms
            .values()
            .flatten()
            .find(|m| m.session_id == session_id)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(members: &[Member]) -> Vec<Uuid> {
        members.iter().map(|m| m.session_id).collect()
    }

    #[test]
    fn join_returns_pre_join_snapshot() {
        let mut rooms = RoomRegistry::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        assert!(rooms.join("ABC", a, "A").unwrap().is_empty());
        assert_eq!(ids(&rooms.join("ABC", b, "B").unwrap()), vec![a]);
        assert_eq!(ids(&rooms.join("ABC", c, "C").unwrap()), vec![a, b]);

        assert_eq!(ids(rooms.members("ABC")), vec![a, b, c]);
    }

    #[test]
    fn room_codes_are_case_sensitive() {
        let mut rooms = RoomRegistry::new();
        rooms.join("abc", Uuid::new_v4(), "A").unwrap();
        let snapshot = rooms.join("ABC", Uuid::new_v4(), "B").unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(rooms.room_count(), 2);
    }

    #[test]
    fn session_is_in_at_most_one_room() {
        let mut rooms = RoomRegistry::new();
        let a = Uuid::new_v4();
        rooms.join("one", a, "A").unwrap();

        let err = rooms.join("two", a, "A").unwrap_err();
        assert_eq!(
            err,
            RoomError::AlreadyJoined {
                session_id: a,
                room: "one".to_string()
            }
        );
        assert!(!rooms.contains_room("two"));
        assert_eq!(rooms.members("one").len(), 1);
    }

    #[test]
    fn empty_room_code_is_rejected() {
        let mut rooms = RoomRegistry::new();
        assert_eq!(
            rooms.join("  ", Uuid::new_v4(), "A").unwrap_err(),
            RoomError::EmptyRoomCode
        );
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn duplicate_names_are_distinct_members() {
        let mut rooms = RoomRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        rooms.join("ABC", a, "sam").unwrap();
        rooms.join("ABC", b, "sam").unwrap();

        let (_, left) = rooms.leave(a).unwrap();
        assert_eq!(left.session_id, a);
        assert_eq!(ids(rooms.members("ABC")), vec![b]);
    }

    #[test]
    fn last_leave_deletes_room() {
        let mut rooms = RoomRegistry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        rooms.join("ABC", a, "A").unwrap();
        rooms.join("ABC", b, "B").unwrap();

        let (room, member) = rooms.leave(a).unwrap();
        assert_eq!(room, "ABC");
        assert_eq!(member.name, "A");
        assert!(rooms.contains_room("ABC"));

        rooms.leave(b).unwrap();
        assert!(!rooms.contains_room("ABC"));
        assert_eq!(rooms.room_count(), 0);
    }

    #[test]
    fn leave_unknown_session_is_not_found() {
        let mut rooms = RoomRegistry::new();
        rooms.join("ABC", Uuid::new_v4(), "A").unwrap();
        assert!(rooms.leave(Uuid::new_v4()).is_none());
        assert_eq!(rooms.members("ABC").len(), 1);
    }

    #[test]
    fn membership_tracks_join_leave_sequences() {
        let mut rooms = RoomRegistry::new();
        let sessions: Vec<Uuid> = (0..6).map(|_| Uuid::new_v4()).collect();
        let mut expected: Vec<Uuid> = Vec::new();

        for (i, id) in sessions.iter().enumerate() {
            rooms.join("ABC", *id, &format!("user{}", i)).unwrap();
            expected.push(*id);
            if i % 2 == 1 {
                let gone = expected.remove(0);
                rooms.leave(gone).unwrap();
            }
            assert_eq!(ids(rooms.members("ABC")), expected);
        }

        for id in expected.drain(..) {
            rooms.leave(id).unwrap();
        }
        assert_eq!(rooms.room_count(), 0);
    }
}
