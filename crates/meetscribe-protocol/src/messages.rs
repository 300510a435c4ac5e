use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::MemberData;

/// Messages sent from client to server via WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce this session in a room
    JoinRoom { room_code: String, user_name: String },

    /// Leave the current room without closing the connection
    LeaveRoom,

    /// Handshake payload for another session, relayed as-is
    Signal {
        to: Uuid,
        signal: serde_json::Value,
    },

    /// Finalized transcript line spoken by this session
    Transcript { text: String },

    /// Ping to keep connection alive
    Ping,
}

/// Messages sent from server to client via WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection: the relay-assigned session id
    Connected { session_id: Uuid },

    /// Members already in the room when this session joined
    RoomUsers { users: Vec<MemberData> },

    /// Another member joined the room
    UserJoined { user: MemberData },

    /// A member left the room
    UserLeft { user: MemberData },

    /// Handshake payload from another session
    Signal {
        from: Uuid,
        signal: serde_json::Value,
    },

    /// Transcript line from another member
    Transcript {
        session_id: Uuid,
        from: String,
        text: String,
    },

    /// Error message
    Error { message: String },

    /// Pong response to ping
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_messages_use_event_names() {
        let join = ClientMessage::JoinRoom {
            room_code: "ABC".to_string(),
            user_name: "alice".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&join).unwrap(),
            json!({ "type": "join-room", "room_code": "ABC", "user_name": "alice" })
        );

        let leave: ClientMessage = serde_json::from_str(r#"{"type":"leave-room"}"#).unwrap();
        assert_eq!(leave, ClientMessage::LeaveRoom);
    }

    #[test]
    fn server_messages_use_event_names() {
        let id = Uuid::new_v4();
        let msg = ServerMessage::UserJoined {
            user: MemberData::new(id, "bob"),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "user-joined");
        assert_eq!(value["user"]["name"], "bob");

        let value = serde_json::to_value(ServerMessage::RoomUsers { users: vec![] }).unwrap();
        assert_eq!(value, json!({ "type": "room-users", "users": [] }));
    }

    #[test]
    fn signal_payload_is_carried_verbatim() {
        let payload = json!({ "type": "offer", "sdp": "v=0\r\n", "extra": [1, 2, { "x": null }] });
        let raw = json!({ "type": "signal", "to": Uuid::nil(), "signal": payload.clone() });

        let parsed: ClientMessage = serde_json::from_value(raw).unwrap();
        match parsed {
            ClientMessage::Signal { to, signal } => {
                assert_eq!(to, Uuid::nil());
                assert_eq!(signal, payload);
            }
            other => panic!("expected signal, got {:?}", other),
        }
    }
}
