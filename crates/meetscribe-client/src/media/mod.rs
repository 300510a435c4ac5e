pub mod audio;
pub mod peer;

pub use audio::{MicrophoneCapture, PcmFrame};
pub use peer::{LocalMedia, NegotiationError, WebRtcConnector};
