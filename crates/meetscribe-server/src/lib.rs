//! MeetScribe Server Library
//!
//! Room registry, signaling relay and summarization route, exposed for
//! testing and embedding.

pub mod api;
pub mod error;
pub mod services;
pub mod state;
pub mod webrtc;
pub mod ws;

/// Create and configure the server application
pub fn create_app(config: state::Config) -> axum::Router {
    api::create_router(state::AppState::new(config))
}
