//! Error types for the signaling engine and its callers.

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the conference crate.
///
/// Anything that could corrupt the peer map or the candidate buffer is
/// prevented by idempotent checks inside the engine instead of being thrown;
/// the variants here either stop `init()` or report caller misuse.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Relay connection could not be established or has gone away.
    #[error("transport error: {0}")]
    Transport(String),

    /// The media passed in is not the caller's current publication.
    #[error("media ownership error: {0}")]
    Ownership(String),

    /// A different publication is already active in this room.
    #[error("a local publication is already active")]
    AlreadyPublishing,

    /// `register()` was called while already joined to a room.
    #[error("already joined room {0}")]
    AlreadyJoined(u64),

    /// A session description or ICE candidate was rejected. Recovered
    /// locally by the inbound path; only surfaces from direct link calls.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// A message referenced a remote id with no tracked peer session.
    /// Swallowed by the state machine, never surfaced to the application.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
