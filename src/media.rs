//! Media publications: a track set plus per-source enable flags.
//!
//! The crate never performs capture or rendering. Callers build a local
//! publication from tracks they captured themselves, and receive remote
//! publications through the room's `NewStream` notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::identity::Identity;

/// A locally captured track, as handed to the peer connections.
pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Where the tracks of a publication come from.
pub enum MediaSource {
    /// Tracks captured by this participant.
    Local(Vec<LocalTrack>),
    /// Tracks received from a remote peer session.
    Remote(Vec<Arc<TrackRemote>>),
}

/// A media source together with its audio/video enable flags.
///
/// The flags are plain metadata until the caller pushes them to the peers
/// with [`SignalingEngine::set_constraint`](crate::engine::SignalingEngine::set_constraint);
/// a disabled flag pauses the outbound sender, it never removes the track.
pub struct MediaPublication {
    id: String,
    owner: Identity,
    source: MediaSource,
    audio: AtomicBool,
    video: AtomicBool,
}

impl MediaPublication {
    /// Wrap locally captured tracks for publication.
    pub fn local(owner: Identity, tracks: Vec<LocalTrack>) -> Arc<Self> {
        let id = format!("{}_usermedia", owner.id);
        Arc::new(Self {
            id,
            owner,
            source: MediaSource::Local(tracks),
            audio: AtomicBool::new(true),
            video: AtomicBool::new(false),
        })
    }

    /// Wrap a track received from a remote peer. One publication per remote
    /// track; the id embeds both stream and track so an audio and a video
    /// track from the same remote each surface once.
    pub(crate) fn remote(owner: Identity, track: Arc<TrackRemote>) -> Arc<Self> {
        let id = format!("{}:{}", track.stream_id(), track.id());
        Arc::new(Self {
            id,
            owner,
            source: MediaSource::Remote(vec![track]),
            audio: AtomicBool::new(true),
            video: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, MediaSource::Local(_))
    }

    /// Tracks to attach to outbound peer sessions. Empty for remote media.
    pub fn local_tracks(&self) -> &[LocalTrack] {
        match &self.source {
            MediaSource::Local(tracks) => tracks,
            MediaSource::Remote(_) => &[],
        }
    }

    /// Tracks received from the remote owner. Empty for local media.
    pub fn remote_tracks(&self) -> &[Arc<TrackRemote>] {
        match &self.source {
            MediaSource::Remote(tracks) => tracks,
            MediaSource::Local(_) => &[],
        }
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.load(Ordering::Acquire)
    }

    pub fn video_enabled(&self) -> bool {
        self.video.load(Ordering::Acquire)
    }

    /// Toggle the audio flag. For a published source, follow with
    /// `set_constraint` to propagate the change to every peer.
    pub fn set_audio_enabled(&self, enabled: bool) {
        self.audio.store(enabled, Ordering::Release);
    }

    pub fn set_video_enabled(&self, enabled: bool) {
        self.video.store(enabled, Ordering::Release);
    }
}

impl std::fmt::Debug for MediaPublication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPublication")
            .field("id", &self.id)
            .field("owner", &self.owner.id)
            .field("local", &self.is_local())
            .field("audio", &self.audio_enabled())
            .field("video", &self.video_enabled())
            .finish()
    }
}
