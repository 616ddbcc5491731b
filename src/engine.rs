//! The signaling and peer-session orchestration core.
//!
//! The engine owns the remote-id → [`PeerSession`] map, the pending-ICE
//! buffer, and the local publication. Inbound relay messages are consumed by
//! a single loop in arrival order, which is what keeps per-remote-peer
//! ordering intact without a central coordinator; the state machine itself
//! tolerates cross-sender reordering (candidates before descriptions,
//! near-simultaneous joins, late messages for departed peers).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, watch, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::media::MediaPublication;
use crate::message::{SignalMessage, SignalPayload};
use crate::peer::{
    LinkContext, LinkState, NegotiationRole, PeerLink, PeerLinkFactory, PeerSession,
};
use crate::transport::Transport;

const EVENT_CAPACITY: usize = 64;

/// Notifications emitted by the engine, relayed room-scoped by
/// [`ConferenceRoom`](crate::room::ConferenceRoom).
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A peer session finished negotiating (answer processed on either side).
    NewPeople { contact: Identity },
    /// The named participant left and its session was torn down.
    PeopleLeave { leave_id: String },
    /// A remote media source arrived on a peer session.
    Stream { media: Arc<MediaPublication> },
}

/// Association of the engine with one room.
#[derive(Debug, Clone)]
pub struct RoomMembership {
    pub room_id: u64,
    pub joined: bool,
}

#[derive(Default)]
struct EngineState {
    peers: HashMap<String, PeerSession>,
    pending_candidates: HashMap<String, Vec<RTCIceCandidateInit>>,
    publication: Option<Arc<MediaPublication>>,
    membership: Option<RoomMembership>,
}

/// Signaling state machine for one local participant.
pub struct SignalingEngine {
    display_name: String,
    transport: Arc<dyn Transport>,
    links: Arc<dyn PeerLinkFactory>,
    local: OnceCell<Identity>,
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

impl SignalingEngine {
    pub fn new(
        display_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        links: Arc<dyn PeerLinkFactory>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            display_name: display_name.into(),
            transport,
            links,
            local: OnceCell::new(),
            state: Mutex::new(EngineState::default()),
            events,
        })
    }

    /// Connect the transport and mint the local identity.
    ///
    /// Concurrent and repeated calls collapse onto a single connection
    /// attempt; once connected, the identity is returned as-is forever.
    pub async fn init(&self) -> Result<Identity> {
        self.local
            .get_or_try_init(|| async {
                let id = self.transport.connect().await?;
                info!(id = %id, "connected to signaling relay");
                Ok(Identity::new(id, self.display_name.clone()))
            })
            .await
            .cloned()
    }

    /// Local identity, if `init()` has completed.
    pub fn identity(&self) -> Option<&Identity> {
        self.local.get()
    }

    /// Subscribe to engine notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Watch the connection state of the link to `remote_id`. `None` when no
    /// session is tracked for that id. The receiver stays valid after the
    /// peer leaves and reports the final `Closed` state.
    pub async fn peer_state(&self, remote_id: &str) -> Option<watch::Receiver<LinkState>> {
        let state = self.state.lock().await;
        state.peers.get(remote_id).map(|session| session.link.state())
    }

    /// Consume the transport's inbound stream until it ends. Messages are
    /// handled strictly sequentially, preserving per-sender arrival order.
    pub fn run(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = self.transport.recv().await {
                self.handle_message(message).await;
            }
            debug!("signaling message loop ended");
        })
    }

    fn local_identity(&self) -> Result<Identity> {
        self.local
            .get()
            .cloned()
            .ok_or_else(|| Error::Transport("signaling transport not connected".to_string()))
    }

    /// Send a join message for `room_id` and mark the membership joined.
    pub async fn register(&self, room_id: u64) -> Result<()> {
        let local = self.local_identity()?;
        let mut state = self.state.lock().await;
        if let Some(membership) = &state.membership {
            if membership.joined {
                return Err(Error::AlreadyJoined(membership.room_id));
            }
        }
        self.transport
            .send(SignalMessage::broadcast(local, SignalPayload::Join))
            .await?;
        state.membership = Some(RoomMembership {
            room_id,
            joined: true,
        });
        info!(room = room_id, "join request sent");
        Ok(())
    }

    /// Hard teardown: detach and drop the publication, announce the
    /// departure, close every peer session, clear all state, and disconnect
    /// the transport. Safe on an already-empty engine.
    pub async fn unregister(&self) -> Result<()> {
        let local = self.local_identity()?;
        let mut state = self.state.lock().await;

        // Detach first so the capture side can release its devices once the
        // engine's references are gone.
        if let Some(media) = state.publication.take() {
            for session in state.peers.values() {
                session.link.detach(&media).await;
            }
        }

        let message = SignalMessage::broadcast(
            local.clone(),
            SignalPayload::Close {
                disconnect: local.id,
            },
        );
        if let Err(e) = self.transport.send(message).await {
            warn!("close message not delivered: {e}");
        }

        for (_, session) in state.peers.drain() {
            session.link.close().await;
        }
        state.pending_candidates.clear();
        state.membership = None;
        drop(state);

        self.transport.disconnect().await;
        info!("unregistered and disconnected from relay");
        Ok(())
    }

    /// Bind `media` as the local publication and attach it to every peer.
    /// Re-publishing the same media is a no-op.
    pub async fn publish(&self, media: Arc<MediaPublication>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(current) = &state.publication {
            if Arc::ptr_eq(current, &media) {
                return Ok(());
            }
            // Room-level gating should have rejected this; keep the sender
            // bookkeeping coherent anyway.
            warn!("replacing active publication");
            let current = current.clone();
            for session in state.peers.values() {
                session.link.detach(&current).await;
            }
        }
        for session in state.peers.values() {
            if let Err(e) = session.link.attach(&media).await {
                warn!(peer = %session.remote.id, "failed to attach publication: {e}");
            }
        }
        info!(media = media.id(), peers = state.peers.len(), "publication bound");
        state.publication = Some(media);
        Ok(())
    }

    /// Detach `media` from every peer and clear the publication.
    pub async fn unpublish(&self, media: &Arc<MediaPublication>) -> Result<()> {
        let mut state = self.state.lock().await;
        if !Self::owns(&state, media) {
            return Err(Error::Ownership(
                "media is not the current publication".to_string(),
            ));
        }
        for session in state.peers.values() {
            session.link.detach(media).await;
        }
        state.publication = None;
        info!(media = media.id(), "publication cleared");
        Ok(())
    }

    /// Push `media`'s enable flags to the outbound senders of every peer.
    /// Muting pauses a sender, it never removes the track, so the remote
    /// keeps its end of the session untouched and no renegotiation happens.
    pub async fn set_constraint(&self, media: &Arc<MediaPublication>) -> Result<()> {
        let state = self.state.lock().await;
        if !Self::owns(&state, media) {
            return Err(Error::Ownership(
                "media is not the current publication".to_string(),
            ));
        }
        let audio = media.audio_enabled();
        let video = media.video_enabled();
        for session in state.peers.values() {
            session.link.set_send_enabled(audio, video).await;
        }
        debug!(audio, video, "send constraints updated");
        Ok(())
    }

    fn owns(state: &EngineState, media: &Arc<MediaPublication>) -> bool {
        state
            .publication
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, media))
    }

    /// Inbound dispatch. Everything is ignored until the engine has joined a
    /// room. The state lock is held for the whole message so handling is
    /// atomic with respect to the public methods; in particular a message
    /// racing `unregister()` can never repopulate the cleared maps.
    pub(crate) async fn handle_message(&self, message: SignalMessage) {
        let mut state = self.state.lock().await;
        if !state.membership.as_ref().is_some_and(|m| m.joined) {
            return;
        }
        let SignalMessage { from, payload, .. } = message;
        match payload {
            SignalPayload::Join => self.handle_join(&mut state, from).await,
            SignalPayload::Offer { sdp } => self.handle_offer(&mut state, from, sdp).await,
            SignalPayload::Answer { sdp } => self.handle_answer(&mut state, from, sdp).await,
            SignalPayload::Ice { candidate } => self.handle_ice(&mut state, from, candidate).await,
            SignalPayload::Close { disconnect } => self.handle_close(&mut state, disconnect).await,
        }
    }

    /// Get or create the session for `remote`. Creation attaches the current
    /// publication so late joiners receive it too.
    async fn ensure_peer(
        &self,
        state: &mut EngineState,
        remote: &Identity,
        role: NegotiationRole,
    ) -> Result<Arc<dyn PeerLink>> {
        if let Some(session) = state.peers.get(&remote.id) {
            return Ok(session.link.clone());
        }
        let local = self.local_identity()?;
        let link = self
            .links
            .create(LinkContext {
                local,
                remote: remote.clone(),
                transport: self.transport.clone(),
                events: self.events.clone(),
            })
            .await?;
        if let Some(media) = &state.publication {
            if let Err(e) = link.attach(media).await {
                warn!(peer = %remote.id, "failed to attach publication: {e}");
            }
        }
        state.peers.insert(
            remote.id.clone(),
            PeerSession {
                remote: remote.clone(),
                role,
                link: link.clone(),
            },
        );
        info!(peer = %remote.id, ?role, "peer session created");
        Ok(link)
    }

    async fn handle_join(&self, state: &mut EngineState, from: Identity) {
        debug!(peer = %from.id, "join received");
        // Near-simultaneous joins: one of the sides already negotiated or is
        // negotiating, so a second offer would only cause glare.
        if state.peers.contains_key(&from.id) {
            return;
        }
        let link = match self
            .ensure_peer(state, &from, NegotiationRole::Initiator)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!(peer = %from.id, "could not create peer session: {e}");
                return;
            }
        };
        let offer = match link.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!(peer = %from.id, "offer creation failed: {e}");
                return;
            }
        };
        let Ok(local) = self.local_identity() else {
            return;
        };
        let message = SignalMessage::to_peer(local, from.id.clone(), SignalPayload::Offer { sdp: offer });
        if let Err(e) = self.transport.send(message).await {
            warn!(peer = %from.id, "offer not delivered: {e}");
        }
    }

    async fn handle_offer(&self, state: &mut EngineState, from: Identity, sdp: RTCSessionDescription) {
        debug!(peer = %from.id, "offer received");
        let link = match self
            .ensure_peer(state, &from, NegotiationRole::Responder)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!(peer = %from.id, "could not create peer session: {e}");
                return;
            }
        };
        let answer = match link.accept_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                // The session stays in whatever partial state the transport
                // layer left it in; recoverable, not fatal.
                warn!(peer = %from.id, "remote description rejected: {e}");
                return;
            }
        };
        let Ok(local) = self.local_identity() else {
            return;
        };
        let message =
            SignalMessage::to_peer(local, from.id.clone(), SignalPayload::Answer { sdp: answer });
        if let Err(e) = self.transport.send(message).await {
            warn!(peer = %from.id, "answer not delivered: {e}");
        }
        Self::flush_pending(state, &from.id, &link).await;
        let _ = self.events.send(EngineEvent::NewPeople { contact: from });
    }

    async fn handle_answer(&self, state: &mut EngineState, from: Identity, sdp: RTCSessionDescription) {
        debug!(peer = %from.id, "answer received");
        let Some(session) = state.peers.get(&from.id) else {
            debug!(peer = %from.id, "answer for unknown peer ignored");
            return;
        };
        let link = session.link.clone();
        if let Err(e) = link.accept_answer(sdp).await {
            warn!(peer = %from.id, "remote description rejected: {e}");
            return;
        }
        Self::flush_pending(state, &from.id, &link).await;
        let _ = self.events.send(EngineEvent::NewPeople { contact: from });
    }

    async fn handle_ice(&self, state: &mut EngineState, from: Identity, candidate: RTCIceCandidateInit) {
        if let Some(session) = state.peers.get(&from.id) {
            if session.link.has_remote_description().await {
                if let Err(e) = session.link.add_remote_candidate(candidate).await {
                    warn!(peer = %from.id, "candidate rejected: {e}");
                }
                return;
            }
        }
        // No session yet, or no remote description: buffer in arrival order.
        state
            .pending_candidates
            .entry(from.id.clone())
            .or_default()
            .push(candidate);
        debug!(peer = %from.id, "candidate buffered until remote description");
    }

    async fn handle_close(&self, state: &mut EngineState, disconnect: String) {
        state.pending_candidates.remove(&disconnect);
        match Self::take_peer(state, &disconnect) {
            Ok(session) => {
                session.link.close().await;
                info!(peer = %disconnect, "peer left");
                let _ = self.events.send(EngineEvent::PeopleLeave {
                    leave_id: disconnect,
                });
            }
            Err(e) => debug!("close ignored: {e}"),
        }
    }

    /// The queue is removed before applying, so a second flush for the same
    /// remote finds nothing and candidates are never replayed.
    async fn flush_pending(state: &mut EngineState, remote_id: &str, link: &Arc<dyn PeerLink>) {
        let Some(queued) = state.pending_candidates.remove(remote_id) else {
            return;
        };
        debug!(peer = remote_id, count = queued.len(), "flushing buffered candidates");
        for candidate in queued {
            if let Err(e) = link.add_remote_candidate(candidate).await {
                warn!(peer = remote_id, "buffered candidate rejected: {e}");
            }
        }
    }

    fn take_peer(state: &mut EngineState, remote_id: &str) -> Result<PeerSession> {
        state
            .peers
            .remove(remote_id)
            .ok_or_else(|| Error::UnknownPeer(remote_id.to_string()))
    }

    #[cfg(test)]
    pub(crate) fn emit_event(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }

    #[cfg(test)]
    pub(crate) async fn peer_ids(&self) -> Vec<String> {
        self.state.lock().await.peers.keys().cloned().collect()
    }
}
