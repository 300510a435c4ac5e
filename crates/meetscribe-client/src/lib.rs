//! MeetScribe client library
//!
//! A headless meeting participant: relay connection, pairwise peer
//! negotiation, live transcription of the local microphone and the
//! per-speaker transcript the summaries are built from.

pub mod console;
pub mod media;
pub mod negotiation;
pub mod network;
pub mod session;
pub mod state;
pub mod transcription;

pub use session::{Command, RoomSession};
