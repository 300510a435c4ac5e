//! One participant's record of its connection to one remote participant.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Which side of the pairwise handshake this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Produces the first handshake payload
    Initiator,
    /// Waits for the initiator's payload and answers it
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Negotiating,
    Connected,
    Closed,
}

/// Description of remote media that arrived on a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEventKind {
    /// A local handshake payload is ready for the remote peer
    Signal(Value),
    /// Remote media arrived
    Stream(RemoteStream),
    /// The media connection failed and will not recover on its own
    Failed(String),
}

/// Event raised by a media connection, tagged with the link it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    pub remote: Uuid,
    pub link_id: u64,
    pub kind: LinkEventKind,
}

/// What a media connection needs to report back to the controller
#[derive(Debug, Clone)]
pub struct LinkContext {
    pub remote: Uuid,
    pub link_id: u64,
    pub role: Role,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkContext {
    pub fn new(
        remote: Uuid,
        link_id: u64,
        role: Role,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            remote,
            link_id,
            role,
            events,
        }
    }

    pub fn emit(&self, kind: LinkEventKind) {
        let event = LinkEvent {
            remote: self.remote,
            link_id: self.link_id,
            kind,
        };
        if self.events.send(event).is_err() {
            tracing::debug!("Link event for {} dropped, controller is gone", self.remote);
        }
    }

    pub fn emit_signal(&self, payload: Value) {
        self.emit(LinkEventKind::Signal(payload));
    }

    pub fn emit_failed(&self, reason: impl Into<String>) {
        self.emit(LinkEventKind::Failed(reason.into()));
    }
}

/// A direct media connection to one remote peer.
///
/// Handshakes are single-shot: each side produces exactly one payload per
/// negotiation attempt, delivered through [`LinkContext::emit_signal`].
#[async_trait]
pub trait MediaConnection: Send + Sync {
    /// Feed a handshake payload received from the remote peer.
    async fn signal(&self, payload: Value) -> Result<()>;

    /// Release the connection and any media it carries.
    async fn close(&self) -> Result<()>;
}

/// Factory for media connections. An initiator connection starts producing
/// its payload as soon as it is created.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, ctx: LinkContext) -> Result<Arc<dyn MediaConnection>>;
}

pub struct PeerLink {
    pub(crate) id: u64,
    pub(crate) remote: Uuid,
    pub(crate) name: Option<String>,
    pub(crate) role: Role,
    pub(crate) state: LinkState,
    pub(crate) connection: Option<Arc<dyn MediaConnection>>,
    pub(crate) stream: Option<RemoteStream>,
}

impl PeerLink {
    pub fn remote(&self) -> Uuid {
        self.remote
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn stream(&self) -> Option<&RemoteStream> {
        self.stream.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.state != LinkState::Closed
    }

    /// Move to `Closed` and release the media connection. Failing to
    /// release leaks the connection but is not fatal.
    pub(crate) async fn close(&mut self) {
        self.state = LinkState::Closed;
        self.stream = None;
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                tracing::warn!("Failed to release connection to {}: {}", self.remote, e);
            }
        }
    }
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("stream", &self.stream)
            .finish()
    }
}
