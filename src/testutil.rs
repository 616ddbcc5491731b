//! Shared test doubles: a channel-backed transport and scripted peer links.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Error, Result};
use crate::media::MediaPublication;
use crate::message::SignalMessage;
use crate::peer::{LinkContext, LinkState, PeerLink, PeerLinkFactory};
use crate::transport::Transport;

const TEST_SDP: &str = "v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

pub(crate) fn offer_sdp() -> RTCSessionDescription {
    RTCSessionDescription::offer(TEST_SDP.to_string()).expect("valid offer sdp")
}

pub(crate) fn answer_sdp() -> RTCSessionDescription {
    RTCSessionDescription::answer(TEST_SDP.to_string()).expect("valid answer sdp")
}

pub(crate) fn candidate(n: u16) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: format!(
            "candidate:{n} 1 udp 2130706431 127.0.0.1 {} typ host",
            50000 + n
        ),
        ..Default::default()
    }
}

/// In-memory transport: outbound messages are captured, inbound ones are
/// injected through `inbound_tx`.
pub(crate) struct FakeTransport {
    pub connects: AtomicUsize,
    pub sent: StdMutex<Vec<SignalMessage>>,
    pub inbound_tx: mpsc::UnboundedSender<SignalMessage>,
    inbound: Mutex<mpsc::UnboundedReceiver<SignalMessage>>,
    pub disconnected: AtomicBool,
    fail_connect: bool,
    connect_delay: Option<Duration>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::build(false, None)
    }

    /// Connect attempt fails with a transport error.
    pub fn failing() -> Arc<Self> {
        Self::build(true, None)
    }

    /// Connect takes a while, to let callers race it.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(false, Some(delay))
    }

    fn build(fail_connect: bool, connect_delay: Option<Duration>) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            sent: StdMutex::new(Vec::new()),
            inbound_tx,
            inbound: Mutex::new(inbound_rx),
            disconnected: AtomicBool::new(false),
            fail_connect,
            connect_delay,
        })
    }

    pub fn sent_messages(&self) -> Vec<SignalMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<String> {
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(Error::Transport("connection refused".to_string()));
        }
        Ok("local".to_string())
    }

    async fn send(&self, message: SignalMessage) -> Result<()> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.inbound.lock().await.recv().await
    }

    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Scripted peer link: records every call, flips `has_remote_description`
/// when a description is installed.
pub(crate) struct FakeLink {
    pub remote_id: String,
    has_remote: AtomicBool,
    pub applied: StdMutex<Vec<String>>,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
    pub send_flags: StdMutex<Vec<(bool, bool)>>,
    pub closed: AtomicBool,
    pub reject_descriptions: AtomicBool,
    state_tx: watch::Sender<LinkState>,
    state_rx: watch::Receiver<LinkState>,
}

impl FakeLink {
    pub fn new(remote_id: impl Into<String>) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(LinkState::New);
        Arc::new(Self {
            remote_id: remote_id.into(),
            has_remote: AtomicBool::new(false),
            applied: StdMutex::new(Vec::new()),
            attach_calls: AtomicUsize::new(0),
            detach_calls: AtomicUsize::new(0),
            send_flags: StdMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            reject_descriptions: AtomicBool::new(false),
            state_tx,
            state_rx,
        })
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        Ok(offer_sdp())
    }

    async fn accept_offer(&self, _offer: RTCSessionDescription) -> Result<RTCSessionDescription> {
        if self.reject_descriptions.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("rejected by test".to_string()));
        }
        self.has_remote.store(true, Ordering::SeqCst);
        Ok(answer_sdp())
    }

    async fn accept_answer(&self, _answer: RTCSessionDescription) -> Result<()> {
        if self.reject_descriptions.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("rejected by test".to_string()));
        }
        self.has_remote.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.has_remote.load(Ordering::SeqCst)
    }

    async fn add_remote_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.applied.lock().unwrap().push(candidate.candidate);
        Ok(())
    }

    async fn attach(&self, _media: &MediaPublication) -> Result<()> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&self, _media: &MediaPublication) {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn set_send_enabled(&self, audio: bool, video: bool) {
        self.send_flags.lock().unwrap().push((audio, video));
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _ = self.state_tx.send(LinkState::Closed);
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }
}

/// Factory that hands out [`FakeLink`]s and remembers them.
pub(crate) struct FakeLinkFactory {
    pub created: StdMutex<Vec<Arc<FakeLink>>>,
}

impl FakeLinkFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            created: StdMutex::new(Vec::new()),
        })
    }

    pub fn created_links(&self) -> Vec<Arc<FakeLink>> {
        self.created.lock().unwrap().clone()
    }

    pub fn link_for(&self, remote_id: &str) -> Option<Arc<FakeLink>> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .find(|link| link.remote_id == remote_id)
            .cloned()
    }
}

#[async_trait]
impl PeerLinkFactory for FakeLinkFactory {
    async fn create(&self, ctx: LinkContext) -> Result<Arc<dyn PeerLink>> {
        let link = FakeLink::new(ctx.remote.id.clone());
        self.created.lock().unwrap().push(link.clone());
        Ok(link)
    }
}
