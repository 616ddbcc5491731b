//! Peer session abstractions.
//!
//! [`PeerLink`] is the seam between the signaling state machine and the
//! actual peer transport. The production implementation lives in
//! [`crate::rtc`]; tests drive the engine through scripted links.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::engine::EngineEvent;
use crate::error::Result;
use crate::identity::Identity;
use crate::media::MediaPublication;
use crate::transport::Transport;

/// Which side of the negotiation this engine took for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// We reacted to the remote's join and sent the offer.
    Initiator,
    /// We received an offer and answered.
    Responder,
}

/// Coarse state of the underlying peer connection, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// One negotiated link to one remote participant.
///
/// All methods are safe to call in any order; implementations log and absorb
/// failures that the engine recovers from (detach on an already-empty link,
/// close on a closed link).
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Produce and install the local offer.
    async fn create_offer(&self) -> Result<RTCSessionDescription>;

    /// Install the remote offer and produce the local answer.
    async fn accept_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription>;

    /// Install the remote answer.
    async fn accept_answer(&self, answer: RTCSessionDescription) -> Result<()>;

    /// Whether a remote description has been installed. Candidates must not
    /// be applied before this turns true.
    async fn has_remote_description(&self) -> bool;

    /// Apply one remote ICE candidate.
    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    /// Attach the publication's local tracks to this link.
    async fn attach(&self, media: &MediaPublication) -> Result<()>;

    /// Detach previously attached tracks. Idempotent: never fails when the
    /// tracks are already gone.
    async fn detach(&self, media: &MediaPublication);

    /// Pause or resume the outbound audio/video senders. The senders stay in
    /// place so no renegotiation is needed.
    async fn set_send_enabled(&self, audio: bool, video: bool);

    /// Tear the link down.
    async fn close(&self);

    /// Observe connection state changes.
    fn state(&self) -> watch::Receiver<LinkState>;
}

/// Everything a new link needs to talk back to the world: candidates it
/// discovers go out as targeted `ice` messages, tracks it receives surface
/// as engine notifications.
#[derive(Clone)]
pub struct LinkContext {
    pub local: Identity,
    pub remote: Identity,
    pub transport: Arc<dyn Transport>,
    pub events: broadcast::Sender<EngineEvent>,
}

/// Builds peer links on demand as remotes join.
#[async_trait]
pub trait PeerLinkFactory: Send + Sync {
    async fn create(&self, ctx: LinkContext) -> Result<Arc<dyn PeerLink>>;
}

/// Engine-side record of one remote peer.
pub struct PeerSession {
    pub remote: Identity,
    pub role: NegotiationRole,
    pub link: Arc<dyn PeerLink>,
}
