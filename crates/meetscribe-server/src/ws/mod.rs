pub mod handler;
pub mod relay;
pub mod session;

pub use relay::SignalingRelay;
pub use session::{Session, SessionState};
