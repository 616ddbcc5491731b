//! A conference room: a group of contacts joining each other.
//!
//! The room forwards engine notifications as room-scoped events and gates
//! local publication to at most one active publication at a time.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::engine::EngineEvent;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::media::MediaPublication;
use crate::session::SessionContext;

const EVENT_CAPACITY: usize = 64;

/// Room-scoped notifications delivered to the application.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    /// A remote media source is available for rendering.
    NewStream { media: Arc<MediaPublication> },
    /// A member finished joining.
    NewPeople { contact: Identity },
    /// A member left.
    PeopleLeave { leave_id: String },
}

/// One room the local participant can join.
pub struct ConferenceRoom {
    name: String,
    id: u64,
    session: Arc<SessionContext>,
    published: Mutex<Option<Arc<MediaPublication>>>,
    events: broadcast::Sender<RoomEvent>,
}

impl ConferenceRoom {
    pub fn new(name: impl Into<String>, session: Arc<SessionContext>) -> Arc<Self> {
        Self::with_id(name, rand::random(), session)
    }

    pub fn with_id(name: impl Into<String>, id: u64, session: Arc<SessionContext>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let room = Arc::new(Self {
            name: name.into(),
            id,
            session,
            published: Mutex::new(None),
            events,
        });
        room.clone().spawn_relay();
        room
    }

    /// Relay engine notifications as room events. The same media reported
    /// twice is only forwarded once.
    fn spawn_relay(self: Arc<Self>) {
        let mut engine_events = self.session.engine().subscribe();
        tokio::spawn(async move {
            let mut seen_streams: HashSet<String> = HashSet::new();
            loop {
                match engine_events.recv().await {
                    Ok(EngineEvent::Stream { media }) => {
                        if !seen_streams.insert(media.id().to_string()) {
                            debug!(media = media.id(), "duplicate stream report dropped");
                            continue;
                        }
                        let _ = self.events.send(RoomEvent::NewStream { media });
                    }
                    Ok(EngineEvent::NewPeople { contact }) => {
                        let _ = self.events.send(RoomEvent::NewPeople { contact });
                    }
                    Ok(EngineEvent::PeopleLeave { leave_id }) => {
                        let _ = self.events.send(RoomEvent::PeopleLeave { leave_id });
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "room event relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Subscribe to room events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Join the room.
    pub async fn join(&self) -> Result<()> {
        self.session.engine().register(self.id).await
    }

    /// Leave the room, tearing down every peer session.
    pub async fn leave(&self) -> Result<()> {
        self.published.lock().await.take();
        self.session.engine().unregister().await
    }

    /// Publish local media to every current and future member.
    ///
    /// At most one publication may be active: re-publishing the same media
    /// is a no-op, a different one is rejected rather than silently
    /// replaced.
    pub async fn publish_local(&self, media: Arc<MediaPublication>) -> Result<()> {
        let mut published = self.published.lock().await;
        if let Some(current) = &*published {
            if Arc::ptr_eq(current, &media) {
                return Ok(());
            }
            return Err(Error::AlreadyPublishing);
        }
        self.session.engine().publish(media.clone()).await?;
        *published = Some(media);
        Ok(())
    }

    /// Withdraw a previously published media source.
    pub async fn unpublish_local(&self, media: &Arc<MediaPublication>) -> Result<()> {
        self.session.engine().unpublish(media).await?;
        self.published.lock().await.take();
        Ok(())
    }
}
