//! Receiving a remote participant's feed

pub mod retry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClassroomConfig;
use crate::errors::{ClassroomError, Result};
use crate::gateway::SignalingGateway;
use crate::media::MediaStream;
use crate::publish::PeerSessionInfo;
use crate::types::{Direction, FeedId, HandleId, RoomId, SessionId};
use crate::webrtc::{GatheringOutcome, LocalRole, NegotiationSession, PeerTransport, TransportFactory};

pub use retry::{subscribe_with_retry, RetryPolicy};

/// Negotiates receive-only sessions for remote feeds.
///
/// A failed attempt is never retried here; see [`subscribe_with_retry`].
pub struct FeedSubscriber {
    gateway: Arc<dyn SignalingGateway>,
    transports: Arc<dyn TransportFactory>,
    config: ClassroomConfig,
}

impl FeedSubscriber {
    pub fn new(
        gateway: Arc<dyn SignalingGateway>,
        transports: Arc<dyn TransportFactory>,
        config: ClassroomConfig,
    ) -> Self {
        Self {
            gateway,
            transports,
            config,
        }
    }

    pub fn config(&self) -> &ClassroomConfig {
        &self.config
    }

    pub async fn subscribe(&self, room: &RoomId, feed: FeedId) -> Result<Subscription> {
        log::info!("Subscribing to feed {} in room {}", feed, room);
        let reply = self.gateway.subscribe(room, feed).await?;
        if let Some(error) = reply.error {
            log::error!("Gateway refused subscription to feed {}: {}", feed, error);
            return Err(ClassroomError::Gateway(error));
        }
        let ids = (reply.session_id, reply.handle_id);

        let offer = match reply.offer {
            Some(offer) if !offer.is_empty() => offer,
            _ => {
                self.release_handle(room, ids).await;
                return Err(ClassroomError::Negotiation(format!(
                    "gateway sent no offer for feed {}",
                    feed
                )));
            }
        };

        let transport = match self.transports.create(&self.config.ice.rtc_configuration()).await {
            Ok(transport) => transport,
            Err(e) => {
                self.release_handle(room, ids).await;
                return Err(e);
            }
        };

        let negotiation = NegotiationSession::new(
            Arc::clone(&transport),
            self.config.ice.gather_timeout(Direction::Subscribe),
        );
        let gateway = Arc::clone(&self.gateway);
        let outcome = negotiation
            .negotiate(LocalRole::Answer(offer), move |answer| async move {
                gateway.start_subscribe(ids.0, ids.1, &answer).await
            })
            .await;

        match outcome {
            Ok(outcome) => {
                log::info!(
                    "Subscribed to feed {} in room {} (handle {})",
                    feed,
                    room,
                    ids.1
                );
                Ok(Subscription {
                    room_id: room.clone(),
                    feed_id: feed,
                    session_id: ids.0,
                    handle_id: ids.1,
                    transport,
                    gateway: Arc::clone(&self.gateway),
                    gathering: outcome.gathering,
                    created_at: chrono::Utc::now(),
                    left: AtomicBool::new(false),
                })
            }
            Err(e) => {
                log::error!("Subscription to feed {} failed: {}", feed, e);
                if let Err(close_err) = transport.close().await {
                    log::warn!("Failed to close transport {}: {}", transport.id(), close_err);
                }
                self.release_handle(room, ids).await;
                Err(e)
            }
        }
    }

    async fn release_handle(&self, room: &RoomId, (session, handle): (SessionId, HandleId)) {
        let released = match self.gateway.unpublish(room, session, handle).await {
            Ok(ack) => ack.into_result(),
            Err(e) => Err(e),
        };
        if let Err(e) = released {
            log::warn!("Failed to release subscriber handle {}: {}", handle, e);
        }
    }
}

/// A live receive-only session for one remote feed
pub struct Subscription {
    room_id: RoomId,
    feed_id: FeedId,
    session_id: SessionId,
    handle_id: HandleId,
    transport: Arc<dyn PeerTransport>,
    gateway: Arc<dyn SignalingGateway>,
    gathering: GatheringOutcome,
    created_at: chrono::DateTime<chrono::Utc>,
    left: AtomicBool,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("room_id", &self.room_id)
            .field("feed_id", &self.feed_id)
            .field("session_id", &self.session_id)
            .field("handle_id", &self.handle_id)
            .field("gathering", &self.gathering)
            .field("created_at", &self.created_at)
            .field("left", &self.left)
            .finish_non_exhaustive()
    }
}

impl Subscription {
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_id
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    pub fn is_active(&self) -> bool {
        !self.left.load(Ordering::SeqCst)
    }

    /// The first inbound stream, if media has arrived yet
    pub fn remote_stream(&self) -> Option<MediaStream> {
        let receiver = self.transport.remote_stream();
        let current = receiver.borrow().clone();
        current
    }

    /// Wait up to `timeout` for the first inbound stream
    pub async fn wait_for_stream(&self, timeout: Duration) -> Result<MediaStream> {
        let mut receiver = self.transport.remote_stream();
        let waited = tokio::time::timeout(timeout, receiver.wait_for(|stream| stream.is_some())).await;
        match waited {
            Ok(Ok(stream)) => stream.clone().ok_or_else(|| {
                ClassroomError::Negotiation(format!("feed {} delivered no stream", self.feed_id))
            }),
            Ok(Err(_)) => Err(ClassroomError::Negotiation(format!(
                "transport for feed {} closed before media arrived",
                self.feed_id
            ))),
            Err(_) => Err(ClassroomError::Negotiation(format!(
                "no media from feed {} within {:?}",
                self.feed_id, timeout
            ))),
        }
    }

    /// Release the gateway handle and close the transport. Calling it again
    /// does nothing.
    pub async fn leave(&self) -> Result<()> {
        if self.left.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        release_subscription(
            Arc::clone(&self.gateway),
            Arc::clone(&self.transport),
            self.room_id.clone(),
            self.feed_id,
            (self.session_id, self.handle_id),
        )
        .await
    }

    pub fn info(&self) -> PeerSessionInfo {
        PeerSessionInfo {
            room_id: self.room_id.clone(),
            direction: Direction::Subscribe,
            session_id: self.session_id,
            handle_id: self.handle_id,
            transport_id: self.transport.id().to_string(),
            local_track_count: 0,
            gathering_complete: self.gathering == GatheringOutcome::Complete,
            created_at: self.created_at,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!(
                "Subscription to feed {} dropped outside a runtime; handle {} not released",
                self.feed_id,
                self.handle_id
            );
            return;
        };
        log::debug!("Subscription to feed {} dropped without leave", self.feed_id);
        runtime.spawn(release_subscription(
            Arc::clone(&self.gateway),
            Arc::clone(&self.transport),
            self.room_id.clone(),
            self.feed_id,
            (self.session_id, self.handle_id),
        ));
    }
}

async fn release_subscription(
    gateway: Arc<dyn SignalingGateway>,
    transport: Arc<dyn PeerTransport>,
    room: RoomId,
    feed: FeedId,
    (session, handle): (SessionId, HandleId),
) -> Result<()> {
    let result = match gateway.unpublish(&room, session, handle).await {
        Ok(ack) => ack.into_result(),
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        log::warn!("Gateway leave for feed {} failed: {}", feed, e);
    }

    if let Err(e) = transport.close().await {
        log::warn!("Failed to close transport {}: {}", transport.id(), e);
    }
    log::info!("Left feed {} in room {}", feed, room);
    result
}
