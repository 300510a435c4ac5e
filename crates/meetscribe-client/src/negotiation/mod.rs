//! Peer negotiation controller
//!
//! Keeps exactly one [`PeerLink`] per remote participant and decides which
//! side initiates. Roles follow arrival order only: members listed in the
//! `room-users` snapshot were here first, so we receive from them; members
//! announced by `user-joined` arrived after us, so we initiate toward them.
//! The remote side sees the mirror image, which makes the roles of every
//! pair complementary without either side guessing.

mod link;

pub use link::{
    LinkContext, LinkEvent, LinkEventKind, LinkState, MediaConnection, PeerConnector, PeerLink,
    RemoteStream, Role,
};

use meetscribe_protocol::{ClientMessage, MemberData};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub struct NegotiationController {
    local_id: Uuid,
    links: HashMap<Uuid, PeerLink>,
    connector: Arc<dyn PeerConnector>,
    events: mpsc::UnboundedSender<LinkEvent>,
    next_link_id: u64,
}

impl NegotiationController {
    pub fn new(
        local_id: Uuid,
        connector: Arc<dyn PeerConnector>,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Self {
        Self {
            local_id,
            links: HashMap::new(),
            connector,
            events,
            next_link_id: 0,
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Members already present when we joined: wait for their offers.
    pub async fn on_room_users(&mut self, users: &[MemberData]) {
        for user in users {
            self.open_link(user.session_id, Some(&user.name), Role::Receiver)
                .await;
        }
    }

    /// A member joined after us: we initiate.
    pub async fn on_user_joined(&mut self, user: &MemberData) {
        self.open_link(user.session_id, Some(&user.name), Role::Initiator)
            .await;
    }

    /// Returns whether a link to the departed member existed.
    pub async fn on_user_left(&mut self, session_id: Uuid) -> bool {
        match self.links.remove(&session_id) {
            Some(mut link) => {
                link.close().await;
                tracing::info!("Closed link to {} (member left)", session_id);
                true
            }
            None => false,
        }
    }

    /// Feed a relayed handshake payload into the link for `from`.
    pub async fn on_signal(&mut self, from: Uuid, payload: Value) {
        if from == self.local_id {
            return;
        }

        match self.links.get(&from).map(PeerLink::is_open) {
            Some(false) => {
                tracing::debug!("Ignoring signal from {} on a closed link", from);
                return;
            }
            None => {
                // The handshake overtook the membership event for this peer
                tracing::debug!("Signal from unknown peer {}, opening link as receiver", from);
                self.open_link(from, None, Role::Receiver).await;
            }
            Some(true) => {}
        }

        let Some(link) = self.links.get_mut(&from) else {
            return;
        };
        let Some(connection) = link.connection.clone() else {
            return;
        };

        if let Err(e) = connection.signal(payload).await {
            tracing::warn!("Handshake with {} failed: {}", from, e);
            link.close().await;
        }
    }

    /// Apply an event raised by one of our media connections. Returns the
    /// message to relay, if any.
    pub async fn on_link_event(&mut self, event: LinkEvent) -> Option<ClientMessage> {
        let Some(link) = self
            .links
            .get_mut(&event.remote)
            .filter(|link| link.id == event.link_id && link.is_open())
        else {
            tracing::debug!("Dropping stale event for link {} to {}", event.link_id, event.remote);
            return None;
        };

        match event.kind {
            LinkEventKind::Signal(payload) => Some(ClientMessage::Signal {
                to: event.remote,
                signal: payload,
            }),
            LinkEventKind::Stream(stream) => {
                if link.state == LinkState::Negotiating {
                    link.state = LinkState::Connected;
                    tracing::info!("Linked with {} as {:?}", event.remote, link.role);
                }
                if link.stream.is_none() {
                    link.stream = Some(stream);
                }
                None
            }
            LinkEventKind::Failed(reason) => {
                tracing::warn!("Connection to {} failed: {}", event.remote, reason);
                link.close().await;
                None
            }
        }
    }

    /// Local session teardown: close every link without waiting on any
    /// outstanding handshake.
    pub async fn close_all(&mut self) {
        for (_, mut link) in self.links.drain() {
            link.close().await;
        }
    }

    pub fn link(&self, remote: Uuid) -> Option<&PeerLink> {
        self.links.get(&remote)
    }

    pub fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.links.values()
    }

    pub fn open_links(&self) -> usize {
        self.links.values().filter(|link| link.is_open()).count()
    }

    async fn open_link(&mut self, remote: Uuid, name: Option<&str>, role: Role) {
        if remote == self.local_id {
            return;
        }

        if let Some(existing) = self.links.get_mut(&remote) {
            if existing.is_open() {
                if existing.name.is_none() {
                    existing.name = name.map(str::to_string);
                }
                tracing::debug!("Already linked to {} as {:?}", remote, existing.role);
                return;
            }
        }

        self.next_link_id += 1;
        let id = self.next_link_id;
        let ctx = LinkContext::new(remote, id, role, self.events.clone());

        let (state, connection) = match self.connector.connect(ctx).await {
            Ok(connection) => (LinkState::Negotiating, Some(connection)),
            Err(e) => {
                tracing::warn!("Failed to create connection to {}: {}", remote, e);
                (LinkState::Closed, None)
            }
        };

        tracing::info!("Opened link to {} as {:?}", remote, role);
        self.links.insert(
            remote,
            PeerLink {
                id,
                remote,
                name: name.map(str::to_string),
                role,
                state,
                connection,
                stream: None,
            },
        );
    }
}
