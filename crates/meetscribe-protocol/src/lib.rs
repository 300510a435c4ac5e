//! MeetScribe signaling protocol
//!
//! Wire types shared by the relay server and its clients. Every frame is a
//! JSON text message tagged with its event name in `"type"`.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::{MemberData, SummarizeRequest, Summary};
