//! Publish flow shared by the camera and screen publishers

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use super::session::{PeerSession, PeerSessionInfo};
use crate::config::ClassroomConfig;
use crate::errors::{ClassroomError, MediaError, Result};
use crate::gateway::keepalive::KeepAliveEnd;
use crate::gateway::{KeepAlive, SignalingGateway};
use crate::media::{MediaStream, MediaTrack, TrackKind, TrackState};
use crate::types::{Direction, FeedKind, HandleId, RoomId, SessionId};
use crate::webrtc::{LocalRole, NegotiationSession, PeerTransport, TransportFactory};

/// Why a publication ended without the caller asking
#[derive(Debug, Clone, PartialEq, Eq)]
enum EndReason {
    /// The local source track was ended outside the application
    SourceEnded,
    /// The gateway dropped the session
    RemoteEnded(String),
}

struct Publication {
    id: u64,
    session: PeerSession,
    keepalive: KeepAlive,
}

pub(crate) struct PublisherCore {
    kind: FeedKind,
    gateway: Arc<dyn SignalingGateway>,
    transports: Arc<dyn TransportFactory>,
    config: ClassroomConfig,
    active: Mutex<Option<Publication>>,
    status: watch::Sender<Option<PeerSessionInfo>>,
    next_publication: AtomicU64,
}

impl PublisherCore {
    pub(crate) fn new(
        kind: FeedKind,
        gateway: Arc<dyn SignalingGateway>,
        transports: Arc<dyn TransportFactory>,
        config: ClassroomConfig,
    ) -> Self {
        let (status, _) = watch::channel(None);
        Self {
            kind,
            gateway,
            transports,
            config,
            active: Mutex::new(None),
            status,
            next_publication: AtomicU64::new(1),
        }
    }

    /// Acquire media with `acquire`, negotiate it with the gateway and keep
    /// the resulting session. Publishing again to the same room returns the
    /// live session untouched.
    pub(crate) async fn publish<A, Fut>(
        self: &Arc<Self>,
        room: &RoomId,
        acquire: A,
        unpublish_on_source_end: bool,
    ) -> Result<PeerSessionInfo>
    where
        A: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<MediaStream, MediaError>>,
    {
        let mut active = self.active.lock().await;
        if let Some(publication) = active.as_ref() {
            if publication.session.room_id() == room {
                log::debug!("{} feed already published in room {}", self.kind, room);
                return Ok(publication.session.info());
            }
            return Err(ClassroomError::AlreadyActive(format!(
                "{} feed is already published in room {}",
                self.kind,
                publication.session.room_id()
            )));
        }

        log::info!("Publishing {} feed to room {}", self.kind, room);
        let stream = acquire().await?;

        let transport = match self.transports.create(&self.config.ice.rtc_configuration()).await {
            Ok(transport) => transport,
            Err(e) => {
                stream.stop_all();
                return Err(e);
            }
        };

        let session = match self.negotiate(room, &stream, &transport).await {
            Ok(session) => session,
            Err(e) => {
                log::error!("Publishing {} feed to room {} failed: {}", self.kind, room, e);
                stream.stop_all();
                if let Err(close_err) = transport.close().await {
                    log::warn!("Failed to close transport {}: {}", transport.id(), close_err);
                }
                return Err(e);
            }
        };

        let publication_id = self.next_publication.fetch_add(1, Ordering::SeqCst);
        let keepalive = KeepAlive::spawn(
            Arc::clone(&self.gateway),
            session.session_id(),
            self.config.gateway.keepalive_interval(),
        );
        self.watch_remote_end(publication_id, keepalive.watch_end());
        if unpublish_on_source_end {
            if let Some(video) = session.track(TrackKind::Video) {
                self.watch_source_end(publication_id, video.clone());
            }
        }

        let info = session.info();
        log::info!(
            "{} feed live in room {} (session {}, handle {})",
            self.kind,
            room,
            info.session_id,
            info.handle_id
        );
        *active = Some(Publication {
            id: publication_id,
            session,
            keepalive,
        });
        self.status.send_replace(Some(info.clone()));
        Ok(info)
    }

    async fn negotiate(
        &self,
        room: &RoomId,
        stream: &MediaStream,
        transport: &Arc<dyn PeerTransport>,
    ) -> Result<PeerSession> {
        for track in stream.tracks() {
            transport.add_track(track).await?;
        }

        let direction = Direction::Publish(self.kind);
        let negotiation =
            NegotiationSession::new(Arc::clone(transport), self.config.ice.gather_timeout(direction));

        let gateway = Arc::clone(&self.gateway);
        let exchange_room = room.clone();
        let kind = self.kind;
        // Any handle the gateway allocates must be handed back if the
        // negotiation fails after the reply, refusals included
        let allocated: Arc<std::sync::Mutex<Option<(SessionId, HandleId)>>> = Arc::default();
        let reply_ids = Arc::clone(&allocated);
        let negotiated = negotiation
            .negotiate(LocalRole::Offer, move |offer| async move {
                let reply = gateway.publish(&exchange_room, &offer, kind).await?;
                *reply_ids.lock().unwrap_or_else(|p| p.into_inner()) =
                    Some((reply.session_id, reply.handle_id));
                Ok(reply)
            })
            .await;
        let outcome = match negotiated {
            Ok(outcome) => outcome,
            Err(e) => {
                let ids = allocated.lock().unwrap_or_else(|p| p.into_inner()).take();
                if let Some(ids) = ids {
                    self.release_handle(room, ids).await;
                }
                return Err(e);
            }
        };

        let ids = (outcome.reply.session_id, outcome.reply.handle_id);
        if outcome.applied_remote.is_none() {
            // The gateway allocated a handle but sent nothing to connect to
            self.release_handle(room, ids).await;
            return Err(ClassroomError::Negotiation(format!(
                "gateway returned no answer for {} feed",
                kind
            )));
        }

        Ok(PeerSession::new(
            room.clone(),
            direction,
            ids,
            Arc::clone(transport),
            stream.tracks().to_vec(),
            outcome.gathering,
        ))
    }

    async fn release_handle(&self, room: &RoomId, (session, handle): (SessionId, HandleId)) {
        match self.gateway.unpublish(room, session, handle).await {
            Ok(ack) => {
                if let Err(e) = ack.into_result() {
                    log::warn!("Gateway refused to release handle {}: {}", handle, e);
                }
            }
            Err(e) => log::warn!("Failed to release handle {}: {}", handle, e),
        }
    }

    pub(crate) async fn unpublish(&self, room: &RoomId) -> Result<()> {
        let mut active = self.active.lock().await;
        let publication = match active.take() {
            Some(publication) if publication.session.room_id() == room => publication,
            other => {
                *active = other;
                log::debug!("No {} feed published in room {}", self.kind, room);
                return Ok(());
            }
        };
        self.release(publication, true).await
    }

    /// Gateway first, then local media, so the gateway never advertises a
    /// feed whose tracks are already gone. Local state is reset whatever
    /// the gateway says.
    async fn release(&self, publication: Publication, notify_gateway: bool) -> Result<()> {
        let session = &publication.session;
        publication.keepalive.cancel();

        let result = if notify_gateway {
            match self
                .gateway
                .unpublish(session.room_id(), session.session_id(), session.handle_id())
                .await
            {
                Ok(ack) => ack.into_result(),
                Err(e) => Err(e),
            }
        } else {
            Ok(())
        };
        if let Err(e) = &result {
            log::warn!(
                "Gateway unpublish of {} feed in room {} failed: {}",
                self.kind,
                session.room_id(),
                e
            );
        }

        session.release().await;
        self.status.send_replace(None);
        log::info!("{} feed unpublished from room {}", self.kind, session.room_id());
        result
    }

    async fn end_if_current(&self, publication_id: u64, reason: EndReason) {
        let mut active = self.active.lock().await;
        let publication = match active.take() {
            Some(publication) if publication.id == publication_id => publication,
            other => {
                *active = other;
                return;
            }
        };

        let notify_gateway = match &reason {
            EndReason::SourceEnded => {
                log::info!("{} source ended outside the application, unpublishing", self.kind);
                true
            }
            EndReason::RemoteEnded(why) => {
                log::warn!("Gateway ended {} session: {}", self.kind, why);
                false
            }
        };
        if let Err(e) = self.release(publication, notify_gateway).await {
            log::warn!("Automatic unpublish of {} feed failed: {}", self.kind, e);
        }
    }

    fn watch_source_end(self: &Arc<Self>, publication_id: u64, track: MediaTrack) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            if track.ended().await == TrackState::Ended {
                core.end_if_current(publication_id, EndReason::SourceEnded).await;
            }
        });
    }

    fn watch_remote_end(self: &Arc<Self>, publication_id: u64, end: KeepAliveEnd) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(reason) = end.wait().await {
                core.end_if_current(publication_id, EndReason::RemoteEnded(reason)).await;
            }
        });
    }

    /// Flip the enabled flag of the published track of `kind`
    pub(crate) async fn toggle(&self, kind: TrackKind) -> Result<bool> {
        let active = self.active.lock().await;
        let publication = active
            .as_ref()
            .ok_or_else(|| ClassroomError::NotPublished(format!("no {} feed is published", self.kind)))?;
        let track = publication.session.track(kind).ok_or_else(|| {
            ClassroomError::NotPublished(format!("{} feed has no {:?} track", self.kind, kind))
        })?;

        let enabled = !track.is_enabled();
        track.set_enabled(enabled);
        log::info!(
            "{:?} track of {} feed {}",
            kind,
            self.kind,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(enabled)
    }

    pub(crate) async fn session(&self) -> Option<PeerSessionInfo> {
        self.active.lock().await.as_ref().map(|p| p.session.info())
    }

    pub(crate) async fn is_published(&self, room: &RoomId) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|p| p.session.room_id() == room)
            .unwrap_or(false)
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<Option<PeerSessionInfo>> {
        self.status.subscribe()
    }
}
