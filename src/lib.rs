//! Mesh-topology conference signaling.
//!
//! Participants exchange signaling messages through a relay to negotiate
//! direct peer media sessions, then exchange media over those sessions with
//! no central media server. The crate is the orchestration core: the state
//! machine that turns asynchronous, possibly reordered join/offer/answer/
//! ice/close messages into a correct set of peer sessions, and the
//! bookkeeping that keeps locally published tracks attached to every current
//! peer. Capture and rendering stay outside; callers hand in `TrackLocal`s
//! and receive remote track sets through room events.
//!
//! ```no_run
//! use meshcall::{ConferenceRoom, RoomEvent, RtcConfig, SessionContext, SessionInit};
//!
//! # async fn example() -> meshcall::Result<()> {
//! let init = SessionInit::over_relay("Alice", "ws://relay.example:8080", RtcConfig::default());
//! let session = SessionContext::create(&init).await?;
//!
//! let room = ConferenceRoom::new("standup", session);
//! let mut events = room.subscribe();
//! room.join().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let RoomEvent::NewStream { media } = event {
//!         // hand the track set to the rendering layer
//!         let _ = media.remote_tracks();
//!     }
//! }
//! room.leave().await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod identity;
pub mod media;
pub mod message;
pub mod peer;
pub mod room;
pub mod rtc;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use engine::{EngineEvent, RoomMembership, SignalingEngine};
pub use error::{Error, Result};
pub use identity::Identity;
pub use media::{LocalTrack, MediaPublication, MediaSource};
pub use message::{SignalMessage, SignalPayload};
pub use peer::{LinkContext, LinkState, NegotiationRole, PeerLink, PeerLinkFactory, PeerSession};
pub use room::{ConferenceRoom, RoomEvent};
pub use rtc::{RtcConfig, RtcLinkFactory, RtcPeerLink};
pub use session::{SessionContext, SessionInit};
pub use transport::{Transport, WsTransport};
