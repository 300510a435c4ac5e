mod room;

pub use room::{MemberLookupError, RoomState, RoomStateInner, TranscriptLog};
