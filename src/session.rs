//! Process-wide session context.
//!
//! One [`SessionContext`] exists per local participant: the identity minted
//! on connect plus the engine. There is no ambient global; the application
//! constructs a [`SessionInit`] once at startup and threads the resulting
//! context into every component that needs it.

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::engine::SignalingEngine;
use crate::error::Result;
use crate::identity::Identity;
use crate::peer::PeerLinkFactory;
use crate::rtc::{RtcConfig, RtcLinkFactory};
use crate::transport::{Transport, WsTransport};

/// One-shot initialization guard plus the wiring for the engine.
///
/// Concurrent `SessionContext::create` calls against the same init all await
/// the single in-flight initialization, so exactly one transport connection
/// opens and every caller receives the identical context.
pub struct SessionInit {
    display_name: String,
    transport: Arc<dyn Transport>,
    links: Arc<dyn PeerLinkFactory>,
    slot: OnceCell<Arc<SessionContext>>,
}

impl SessionInit {
    pub fn new(
        display_name: impl Into<String>,
        transport: Arc<dyn Transport>,
        links: Arc<dyn PeerLinkFactory>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            transport,
            links,
            slot: OnceCell::new(),
        }
    }

    /// Production wiring: websocket relay + webrtc peer links.
    pub fn over_relay(
        display_name: impl Into<String>,
        relay_url: impl Into<String>,
        rtc: RtcConfig,
    ) -> Self {
        Self::new(
            display_name,
            WsTransport::new(relay_url),
            RtcLinkFactory::new(rtc),
        )
    }
}

/// The local participant's identity and engine.
pub struct SessionContext {
    identity: Identity,
    engine: Arc<SignalingEngine>,
}

impl SessionContext {
    /// Create (or return) the session for `init`.
    ///
    /// The first caller connects the transport, mints the identity and
    /// starts the engine's message loop; racers await that same attempt and
    /// later callers get the finished context straight back.
    pub async fn create(init: &SessionInit) -> Result<Arc<SessionContext>> {
        init.slot
            .get_or_try_init(|| async {
                let engine = SignalingEngine::new(
                    init.display_name.clone(),
                    init.transport.clone(),
                    init.links.clone(),
                );
                let identity = engine.init().await?;
                engine.clone().run();
                Ok(Arc::new(SessionContext { identity, engine }))
            })
            .await
            .cloned()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn engine(&self) -> &Arc<SignalingEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::{SignalMessage, SignalPayload};
    use crate::testutil::{FakeLinkFactory, FakeTransport};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_creates_share_one_connection() {
        let transport = FakeTransport::slow(Duration::from_millis(50));
        let init = SessionInit::new("Alice", transport.clone(), FakeLinkFactory::new());

        let (a, b, c) = tokio::join!(
            SessionContext::create(&init),
            SessionContext::create(&init),
            SessionContext::create(&init),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&b, &c));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(a.identity().id, "local");
        assert_eq!(a.identity().name, "Alice");
    }

    #[tokio::test]
    async fn later_create_returns_existing_context() {
        let transport = FakeTransport::new();
        let init = SessionInit::new("Alice", transport.clone(), FakeLinkFactory::new());

        let first = SessionContext::create(&init).await.unwrap();
        let second = SessionContext::create(&init).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_failure_propagates() {
        let init = SessionInit::new("Alice", FakeTransport::failing(), FakeLinkFactory::new());
        let err = SessionContext::create(&init).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[tokio::test]
    async fn message_loop_drives_the_engine() {
        let transport = FakeTransport::new();
        let links = FakeLinkFactory::new();
        let init = SessionInit::new("Alice", transport.clone(), links.clone());
        let session = SessionContext::create(&init).await.unwrap();
        session.engine().register(7).await.unwrap();

        transport
            .inbound_tx
            .send(SignalMessage::broadcast(
                Identity::new("p1", "Pat"),
                SignalPayload::Join,
            ))
            .unwrap();

        // The spawned loop picks the join up and negotiates an offer.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let offered = transport
                    .sent_messages()
                    .iter()
                    .any(|m| matches!(m.payload, SignalPayload::Offer { .. }));
                if offered {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("engine loop never sent the offer");

        assert_eq!(links.created_links().len(), 1);
    }
}
