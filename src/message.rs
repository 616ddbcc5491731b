//! Wire schema for relay signaling.
//!
//! A single envelope type is exchanged over the transport's message channel.
//! Session descriptions and ICE candidates reuse the webrtc crate's
//! serde-enabled wire types, so the JSON body of an offer is the familiar
//! `{"type":"offer","sdp":"v=0..."}` shape.

use serde::{Deserialize, Serialize};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::identity::Identity;

/// Everything sent or received through the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Sender of the message.
    pub from: Identity,
    /// Remote peer id when the message is point-to-point; `None` for
    /// room-wide messages (join, close), which the relay fans out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub payload: SignalPayload,
}

/// Message body, dispatched on the `action` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SignalPayload {
    /// Sender entered the room and wants sessions with everyone in it.
    Join,
    /// Session description offered by the negotiation initiator.
    Offer { sdp: RTCSessionDescription },
    /// Responder's session description.
    Answer { sdp: RTCSessionDescription },
    /// A discovered network path option for the sender's session.
    Ice { candidate: RTCIceCandidateInit },
    /// The participant named in `disconnect` is leaving.
    Close { disconnect: String },
}

impl SignalMessage {
    /// Room-wide message (no target).
    pub fn broadcast(from: Identity, payload: SignalPayload) -> Self {
        Self {
            from,
            target: None,
            payload,
        }
    }

    /// Point-to-point message for one remote peer.
    pub fn to_peer(from: Identity, target: impl Into<String>, payload: SignalPayload) -> Self {
        Self {
            from,
            target: Some(target.into()),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::offer_sdp;

    #[test]
    fn join_encodes_action_tag() {
        let msg = SignalMessage::broadcast(Identity::new("p1", "Alice"), SignalPayload::Join);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""action":"join""#));
        // No target key for room-wide messages.
        assert!(!json.contains("target"));
    }

    #[test]
    fn offer_round_trips_with_sdp_body() {
        let msg = SignalMessage::to_peer(
            Identity::new("p1", "Alice"),
            "p2",
            SignalPayload::Offer { sdp: offer_sdp() },
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""action":"offer""#));
        assert!(json.contains(r#""target":"p2""#));

        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.from.id, "p1");
        match parsed.payload {
            SignalPayload::Offer { sdp } => assert!(sdp.sdp.starts_with("v=0")),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn close_names_the_disconnect_target() {
        let msg = SignalMessage::broadcast(
            Identity::new("p1", "Alice"),
            SignalPayload::Close {
                disconnect: "p1".to_string(),
            },
        );
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: SignalMessage = serde_json::from_str(&json).unwrap();
        match parsed.payload {
            SignalPayload::Close { disconnect } => assert_eq!(disconnect, "p1"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
