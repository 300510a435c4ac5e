//! A participant's presence in one room.
//!
//! A single task owns the negotiation controller, the capture bridge and
//! the relay connection, and reacts to relay messages, link events,
//! finalized local speech and user commands in arrival order.

use anyhow::Result;
use meetscribe_protocol::{MemberData, ServerMessage};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::media::{LocalMedia, PcmFrame};
use crate::negotiation::{LinkEvent, NegotiationController, PeerConnector};
use crate::network::RelayClient;
use crate::state::RoomState;
use crate::transcription::{CaptureBridge, SpeechRecognizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mute(bool),
    StartListening,
    StopListening,
    Leave,
}

pub struct RoomSession {
    relay: RelayClient,
    inbound: mpsc::Receiver<ServerMessage>,
    controller: NegotiationController,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    capture: Option<CaptureBridge>,
    local_speech: mpsc::UnboundedReceiver<String>,
    local_speech_tx: mpsc::UnboundedSender<String>,
    local_media: Option<LocalMedia>,
    state: RoomState,
}

impl RoomSession {
    pub fn new(
        relay: RelayClient,
        inbound: mpsc::Receiver<ServerMessage>,
        connector: Arc<dyn PeerConnector>,
        state: RoomState,
    ) -> Self {
        let (event_tx, link_events) = mpsc::unbounded_channel();
        let (local_speech_tx, local_speech) = mpsc::unbounded_channel();
        let controller = NegotiationController::new(relay.session_id(), connector, event_tx);

        Self {
            relay,
            inbound,
            controller,
            link_events,
            capture: None,
            local_speech,
            local_speech_tx,
            local_media: None,
            state,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.relay.session_id()
    }

    /// Mute also silences audio published to peers
    pub fn with_local_media(mut self, media: LocalMedia) -> Self {
        self.local_media = Some(media);
        self
    }

    pub fn with_capture(
        mut self,
        recognizer: Arc<dyn SpeechRecognizer>,
        audio: broadcast::Sender<PcmFrame>,
        sample_rate: u32,
    ) -> Self {
        self.capture = Some(CaptureBridge::new(
            recognizer,
            audio,
            sample_rate,
            self.local_speech_tx.clone(),
        ));
        self
    }

    /// Join `room_code` and process events until told to leave or the relay
    /// goes away. Everything local is torn down before returning.
    pub async fn run(
        mut self,
        room_code: &str,
        user_name: &str,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) -> Result<()> {
        let local = MemberData::new(self.session_id(), user_name);
        self.state.set_joining(local, room_code).await;
        self.relay.join_room(room_code, user_name).await;
        tracing::info!("Joining room {} as {}", room_code, user_name);

        loop {
            tokio::select! {
                msg = self.inbound.recv() => match msg {
                    Some(msg) => self.handle_server_message(msg).await,
                    None => {
                        tracing::warn!("Lost connection to relay");
                        break;
                    }
                },
                Some(event) = self.link_events.recv() => {
                    if let Some(out) = self.controller.on_link_event(event).await {
                        self.relay.send(out).await;
                    }
                }
                Some(text) = self.local_speech.recv() => self.publish_transcript(text).await,
                cmd = commands.recv() => match cmd {
                    Some(Command::Leave) | None => break,
                    Some(cmd) => self.handle_command(cmd).await,
                },
            }
        }

        self.teardown().await;
        let RoomSession { relay, .. } = self;
        relay.close().await;
        Ok(())
    }

    async fn handle_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Connected { session_id } => {
                tracing::debug!("Relay repeated session id {}", session_id);
            }
            ServerMessage::RoomUsers { users } => {
                tracing::info!("{} member(s) already in the room", users.len());
                self.state.set_snapshot(&users).await;
                self.controller.on_room_users(&users).await;
            }
            ServerMessage::UserJoined { user } => {
                tracing::info!("{} joined", user.name);
                self.state.add_member(&user).await;
                self.controller.on_user_joined(&user).await;
            }
            ServerMessage::UserLeft { user } => {
                tracing::info!("{} left", user.name);
                self.controller.on_user_left(user.session_id).await;
                self.state.remove_member(user.session_id).await;
            }
            ServerMessage::Signal { from, signal } => {
                self.controller.on_signal(from, signal).await;
            }
            ServerMessage::Transcript {
                session_id,
                from,
                text,
            } => {
                self.state.add_transcript(session_id, &from, &text).await;
            }
            ServerMessage::Error { message } => {
                tracing::warn!("Relay error: {}", message);
            }
            ServerMessage::Pong => {}
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Mute(muted) => {
                if let Some(media) = &self.local_media {
                    media.set_muted(muted);
                }
                if let Some(capture) = &mut self.capture {
                    if let Err(e) = capture.set_muted(muted).await {
                        tracing::warn!("Transcription did not restart after unmute: {}", e);
                    }
                }
                self.state.set_muted(muted).await;
            }
            Command::StartListening => match &mut self.capture {
                Some(capture) => {
                    if let Err(e) = capture.start_listening().await {
                        tracing::warn!("Failed to start transcription: {}", e);
                    }
                    self.state.set_listening(capture.is_listening()).await;
                }
                None => tracing::warn!("Transcription is not configured"),
            },
            Command::StopListening => {
                if let Some(capture) = &mut self.capture {
                    capture.stop_listening();
                }
                self.state.set_listening(false).await;
            }
            Command::Leave => {}
        }
    }

    /// Lines finalized before a mute can still be queued; they stay local
    /// only if unmuted when they leave.
    async fn publish_transcript(&mut self, text: String) {
        if self.state.read().await.is_muted {
            tracing::debug!("Dropping transcript queued before mute");
            return;
        }
        let local = self.state.read().await.local.clone();
        if let Some(local) = local {
            self.state
                .add_transcript(local.session_id, &local.name, &text)
                .await;
        }
        self.relay.transcript(&text).await;
    }

    async fn teardown(&mut self) {
        if let Some(capture) = &mut self.capture {
            capture.stop_listening();
        }
        self.controller.close_all().await;
        self.relay.leave_room().await;
        self.state.clear().await;
        tracing::info!("Left the room");
    }
}
