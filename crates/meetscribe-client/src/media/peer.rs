//! webrtc-rs peer connections behind the negotiation traits
//!
//! Handshakes are non-trickle: a local description is only emitted once ICE
//! gathering has completed, so each side sends exactly one payload.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use webrtc::api::API;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::audio::{FrameChunker, PcmFrame, RateConverter, SAMPLE_RATE};
use crate::negotiation::{
    LinkContext, LinkEventKind, MediaConnection, PeerConnector, RemoteStream, Role,
};

/// Opus frames are 20ms
const FRAME_DURATION: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("Handshake payload is not a session description: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("A {role:?} cannot accept a remote {sdp_type}")]
    UnexpectedDescription { role: Role, sdp_type: String },

    #[error("No local description after ICE gathering")]
    MissingLocalDescription,
}

/// Local audio shared by every peer connection of this participant.
#[derive(Clone)]
pub struct LocalMedia {
    audio_track: Arc<TrackLocalStaticSample>,
    muted: Arc<AtomicBool>,
}

impl LocalMedia {
    pub fn new() -> Self {
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            "meetscribe-local".to_owned(),
        ));

        Self {
            audio_track,
            muted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Encode microphone audio onto the shared track until the capture ends.
    /// Capture at other rates is resampled first. Nothing is written while
    /// muted.
    pub fn spawn_publisher(
        &self,
        mut frames: broadcast::Receiver<PcmFrame>,
        sample_rate: u32,
    ) -> tokio::task::JoinHandle<()> {
        let track = self.audio_track.clone();
        let muted = self.muted.clone();

        tokio::spawn(async move {
            let encoder =
                opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip);
            let mut encoder = match encoder {
                Ok(encoder) => encoder,
                Err(e) => {
                    tracing::warn!("Not publishing microphone audio: {}", e);
                    return;
                }
            };
            let mut converter = if sample_rate == SAMPLE_RATE {
                None
            } else {
                match RateConverter::new(sample_rate) {
                    Ok(converter) => Some(converter),
                    Err(e) => {
                        tracing::warn!("Not publishing microphone audio: {:#}", e);
                        return;
                    }
                }
            };
            let mut chunker = FrameChunker::new((SAMPLE_RATE / 50) as usize);
            let mut packet = vec![0u8; 4000];

            loop {
                let frame = match frames.recv().await {
                    Ok(frame) => frame,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Audio publisher skipped {} capture blocks", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if muted.load(Ordering::SeqCst) {
                    chunker.clear();
                    if let Some(converter) = &mut converter {
                        converter.clear();
                    }
                    continue;
                }

                let pcm = match &mut converter {
                    Some(converter) => match converter.push(&frame) {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            tracing::warn!("Resampling failed: {}", e);
                            continue;
                        }
                    },
                    None => frame.to_vec(),
                };

                for pcm in chunker.push(&pcm) {
                    let len = match encoder.encode(&pcm, &mut packet) {
                        Ok(len) => len,
                        Err(e) => {
                            tracing::warn!("Opus encode failed: {}", e);
                            continue;
                        }
                    };
                    let sample = Sample {
                        data: packet[..len].to_vec().into(),
                        duration: FRAME_DURATION,
                        ..Default::default()
                    };
                    if let Err(e) = track.write_sample(&sample).await {
                        tracing::debug!("Failed to write audio sample: {}", e);
                    }
                }
            }
        })
    }
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<String>,
    local_media: LocalMedia,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>, local_media: LocalMedia) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers,
            local_media,
        })
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn MediaConnection>> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        pc.add_track(Arc::clone(&self.local_media.audio_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        let track_ctx = ctx.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            tracing::info!(
                "Remote {} track {} from {}",
                track.kind(),
                track.id(),
                track_ctx.remote
            );
            track_ctx.emit(LinkEventKind::Stream(RemoteStream {
                stream_id: track.stream_id().to_string(),
                track_id: track.id().to_string(),
                kind: track.kind().to_string(),
            }));
            Box::pin(async {})
        }));

        let state_ctx = ctx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            tracing::debug!("Peer connection to {} is {}", state_ctx.remote, state);
            if state == RTCPeerConnectionState::Failed {
                state_ctx.emit_failed(format!("peer connection {}", state));
            }
            Box::pin(async {})
        }));

        if ctx.role == Role::Initiator {
            let pc = pc.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                match create_offer(&pc).await {
                    Ok(offer) => ctx.emit_signal(offer),
                    Err(e) => ctx.emit_failed(format!("offer failed: {}", e)),
                }
            });
        }

        Ok(Arc::new(WebRtcConnection { pc, ctx }))
    }
}

pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    ctx: LinkContext,
}

#[async_trait]
impl MediaConnection for WebRtcConnection {
    async fn signal(&self, payload: Value) -> Result<()> {
        let description = accept_description(self.ctx.role, payload)?;

        match self.ctx.role {
            Role::Initiator => {
                self.pc.set_remote_description(description).await?;
                tracing::debug!("Answer from {} applied", self.ctx.remote);
            }
            Role::Receiver => {
                // Answering waits on ICE gathering, keep it off the caller
                let pc = self.pc.clone();
                let ctx = self.ctx.clone();
                tokio::spawn(async move {
                    match create_answer(&pc, description).await {
                        Ok(answer) => ctx.emit_signal(answer),
                        Err(e) => ctx.emit_failed(format!("answer failed: {}", e)),
                    }
                });
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Parse a relayed payload and check it is the description this role expects.
pub fn accept_description(
    role: Role,
    payload: Value,
) -> Result<RTCSessionDescription, NegotiationError> {
    let description: RTCSessionDescription = serde_json::from_value(payload)?;
    match (role, description.sdp_type) {
        (Role::Receiver, RTCSdpType::Offer) | (Role::Initiator, RTCSdpType::Answer) => {
            Ok(description)
        }
        (role, other) => Err(NegotiationError::UnexpectedDescription {
            role,
            sdp_type: other.to_string(),
        }),
    }
}

async fn create_offer(pc: &RTCPeerConnection) -> Result<Value> {
    let offer = pc.create_offer(None).await?;
    let local = gather_local_description(pc, offer).await?;
    Ok(serde_json::to_value(local)?)
}

async fn create_answer(pc: &RTCPeerConnection, offer: RTCSessionDescription) -> Result<Value> {
    pc.set_remote_description(offer).await?;
    let answer = pc.create_answer(None).await?;
    let local = gather_local_description(pc, answer).await?;
    Ok(serde_json::to_value(local)?)
}

async fn gather_local_description(
    pc: &RTCPeerConnection,
    description: RTCSessionDescription,
) -> Result<RTCSessionDescription> {
    let mut gathering_complete = pc.gathering_complete_promise().await;
    pc.set_local_description(description).await?;
    let _ = gathering_complete.recv().await;

    Ok(pc
        .local_description()
        .await
        .ok_or(NegotiationError::MissingLocalDescription)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn receiver_accepts_offer_only() {
        let offer = json!({ "type": "offer", "sdp": "v=0\r\n" });
        let answer = json!({ "type": "answer", "sdp": "v=0\r\n" });

        assert!(accept_description(Role::Receiver, offer.clone()).is_ok());
        assert!(matches!(
            accept_description(Role::Receiver, answer.clone()),
            Err(NegotiationError::UnexpectedDescription { role: Role::Receiver, .. })
        ));
        assert!(accept_description(Role::Initiator, answer).is_ok());
        assert!(accept_description(Role::Initiator, offer).is_err());
    }

    #[test]
    fn non_description_payload_is_rejected() {
        assert!(matches!(
            accept_description(Role::Receiver, json!({ "candidate": "a=candidate:1" })),
            Err(NegotiationError::InvalidPayload(_))
        ));
    }

    #[test]
    fn muted_flag_is_shared_between_clones() {
        let media = LocalMedia::new();
        let clone = media.clone();
        clone.set_muted(true);
        assert!(media.is_muted());
    }
}
