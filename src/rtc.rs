//! WebRTC peer link implementation.
//!
//! Wraps `webrtc::RTCPeerConnection` behind the [`PeerLink`] seam. Candidates
//! discovered locally are sent to the remote as targeted `ice` messages;
//! inbound tracks surface as [`EngineEvent::Stream`] notifications.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::engine::EngineEvent;
use crate::error::{Error, Result};
use crate::media::{LocalTrack, MediaPublication};
use crate::message::{SignalMessage, SignalPayload};
use crate::peer::{LinkContext, LinkState, PeerLink, PeerLinkFactory};

/// Peer connection settings shared by every link.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    pub stun_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_owned()],
        }
    }
}

/// Builds [`RtcPeerLink`]s as remotes join.
pub struct RtcLinkFactory {
    config: RtcConfig,
}

impl RtcLinkFactory {
    pub fn new(config: RtcConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }
}

#[async_trait]
impl PeerLinkFactory for RtcLinkFactory {
    async fn create(&self, ctx: LinkContext) -> Result<Arc<dyn PeerLink>> {
        let link = RtcPeerLink::connect(&self.config, ctx).await?;
        Ok(link)
    }
}

/// One outbound sender, retained so mute can pause and resume it.
struct AttachedSender {
    kind: RTPCodecType,
    track: LocalTrack,
    sender: Arc<RTCRtpSender>,
}

/// [`PeerLink`] on top of a real `RTCPeerConnection`.
pub struct RtcPeerLink {
    remote_id: String,
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<AttachedSender>>,
    state_tx: Arc<watch::Sender<LinkState>>,
    state_rx: watch::Receiver<LinkState>,
}

impl RtcPeerLink {
    async fn connect(config: &RtcConfig, ctx: LinkContext) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Negotiation(format!("failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| Error::Negotiation(format!("failed to register interceptors: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: config
                .stun_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| Error::Negotiation(format!("failed to create peer connection: {e}")))?,
        );

        let (state_tx, state_rx) = watch::channel(LinkState::New);
        let state_tx = Arc::new(state_tx);

        let remote_id = ctx.remote.id.clone();
        info!(peer = %remote_id, "peer connection created");

        let state = Arc::clone(&state_tx);
        let peer = remote_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state = Arc::clone(&state);
            let peer = peer.clone();
            Box::pin(async move {
                let mapped = match s {
                    RTCPeerConnectionState::New => LinkState::New,
                    RTCPeerConnectionState::Connecting => LinkState::Connecting,
                    RTCPeerConnectionState::Connected => LinkState::Connected,
                    RTCPeerConnectionState::Failed => LinkState::Failed,
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        LinkState::Closed
                    }
                    _ => return,
                };
                debug!(peer = %peer, state = ?mapped, "peer connection state changed");
                let _ = state.send(mapped);
            })
        }));

        // Discovered candidates go straight out as targeted ice messages.
        let transport = ctx.transport.clone();
        let local = ctx.local.clone();
        let target = remote_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let transport = transport.clone();
            let local = local.clone();
            let target = target.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else { return };
                let init = match candidate.to_json() {
                    Ok(init) => init,
                    Err(e) => {
                        warn!(peer = %target, "failed to encode candidate: {e}");
                        return;
                    }
                };
                let message = SignalMessage::to_peer(
                    local,
                    target.clone(),
                    SignalPayload::Ice { candidate: init },
                );
                if let Err(e) = transport.send(message).await {
                    warn!(peer = %target, "candidate not delivered: {e}");
                }
            })
        }));

        let events = ctx.events.clone();
        let remote = ctx.remote.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                let remote = remote.clone();
                Box::pin(async move {
                    debug!(peer = %remote.id, kind = %track.kind(), "remote track received");
                    let media = MediaPublication::remote(remote, track);
                    let _ = events.send(EngineEvent::Stream { media });
                })
            },
        ));

        Ok(Arc::new(Self {
            remote_id,
            pc,
            senders: Mutex::new(Vec::new()),
            state_tx,
            state_rx,
        }))
    }
}

#[async_trait]
impl PeerLink for RtcPeerLink {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to create offer: {e}")))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set local description: {e}")))?;
        debug!(peer = %self.remote_id, "offer created");
        Ok(offer)
    }

    async fn accept_offer(&self, offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set remote description: {e}")))?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to create answer: {e}")))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set local description: {e}")))?;
        debug!(peer = %self.remote_id, "answer created");
        Ok(answer)
    }

    async fn accept_answer(&self, answer: RTCSessionDescription) -> Result<()> {
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to set remote description: {e}")))
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::Negotiation(format!("failed to add candidate: {e}")))
    }

    async fn attach(&self, media: &MediaPublication) -> Result<()> {
        let mut senders = self.senders.lock().await;
        for track in media.local_tracks() {
            let sender = self
                .pc
                .add_track(track.clone())
                .await
                .map_err(|e| Error::Negotiation(format!("failed to add track: {e}")))?;
            senders.push(AttachedSender {
                kind: track.kind(),
                track: track.clone(),
                sender,
            });
        }
        debug!(peer = %self.remote_id, media = media.id(), "publication attached");
        Ok(())
    }

    async fn detach(&self, media: &MediaPublication) {
        let mut senders = self.senders.lock().await;
        for attached in senders.drain(..) {
            // The peer may have dropped the track already.
            if let Err(e) = self.pc.remove_track(&attached.sender).await {
                debug!(peer = %self.remote_id, "track already removed: {e}");
            }
        }
        debug!(peer = %self.remote_id, media = media.id(), "publication detached");
    }

    async fn set_send_enabled(&self, audio: bool, video: bool) {
        let senders = self.senders.lock().await;
        for attached in senders.iter() {
            let enabled = match attached.kind {
                RTPCodecType::Audio => audio,
                RTPCodecType::Video => video,
                _ => continue,
            };
            let replacement = if enabled {
                Some(attached.track.clone())
            } else {
                None
            };
            if let Err(e) = attached.sender.replace_track(replacement).await {
                warn!(peer = %self.remote_id, "failed to update send state: {e}");
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            debug!(peer = %self.remote_id, "close on closed connection: {e}");
        }
        let _ = self.state_tx.send(LinkState::Closed);
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }
}
