//! Fake signaling gateway

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::lock;
use crate::errors::{ClassroomError, Result};
use crate::gateway::{GatewayAck, PublishReply, SignalingGateway, SubscribeReply};
use crate::media::MediaTrack;
use crate::types::{FeedId, FeedKind, HandleId, RoomId, SessionId};
use crate::webrtc::SessionDescription;

/// A request the fake gateway received, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Publish {
        room: RoomId,
        kind: FeedKind,
        offer: SessionDescription,
    },
    Subscribe {
        room: RoomId,
        feed: FeedId,
    },
    StartSubscribe {
        session: SessionId,
        handle: HandleId,
        answer: SessionDescription,
    },
    Unpublish {
        room: RoomId,
        session: SessionId,
        handle: HandleId,
        /// Observed tracks still live when the request arrived
        live_tracks: usize,
    },
}

#[derive(Default)]
struct Script {
    publish_error: Option<String>,
    publish_without_answer: bool,
    subscribe_error: Option<String>,
    subscribe_failures_left: u32,
    subscribe_without_offer: bool,
    start_subscribe_error: Option<String>,
    unpublish_error: Option<String>,
    unpublish_unreachable: bool,
    keep_alive_failure: Option<(u32, String)>,
    observed_tracks: Vec<MediaTrack>,
}

pub struct FakeGateway {
    next_session: AtomicU64,
    next_handle: AtomicU64,
    keep_alives: AtomicU64,
    script: Mutex<Script>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            next_session: AtomicU64::new(1000),
            next_handle: AtomicU64::new(2000),
            keep_alives: AtomicU64::new(0),
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Publish replies carry `reason` in their error field
    pub fn fail_publish(&self, reason: &str) {
        lock(&self.script).publish_error = Some(reason.to_string());
    }

    pub fn publish_without_answer(&self) {
        lock(&self.script).publish_without_answer = true;
    }

    pub fn fail_subscribe(&self, reason: &str) {
        lock(&self.script).subscribe_error = Some(reason.to_string());
    }

    /// The next `count` subscribe requests report the feed as not ready
    pub fn fail_first_subscribes(&self, count: u32) {
        lock(&self.script).subscribe_failures_left = count;
    }

    pub fn subscribe_without_offer(&self) {
        lock(&self.script).subscribe_without_offer = true;
    }

    pub fn fail_start_subscribe(&self, reason: &str) {
        lock(&self.script).start_subscribe_error = Some(reason.to_string());
    }

    pub fn fail_unpublish(&self, reason: &str) {
        lock(&self.script).unpublish_error = Some(reason.to_string());
    }

    /// Unpublish calls fail at the transport level
    pub fn unreachable_unpublish(&self) {
        lock(&self.script).unpublish_unreachable = true;
    }

    /// Acknowledge `ok_count` keep-alives, then end the session with `reason`
    pub fn fail_keep_alive_after(&self, ok_count: u32, reason: &str) {
        lock(&self.script).keep_alive_failure = Some((ok_count, reason.to_string()));
    }

    /// Count how many of `tracks` are live whenever unpublish arrives
    pub fn observe_tracks(&self, tracks: Vec<MediaTrack>) {
        lock(&self.script).observed_tracks = tracks;
    }

    pub fn keep_alive_count(&self) -> u64 {
        self.keep_alives.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Publish { .. }))
            .count()
    }

    pub fn subscribe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, GatewayCall::Subscribe { .. }))
            .count()
    }

    /// `(session, handle, live_tracks)` of every unpublish, in order
    pub fn unpublished(&self) -> Vec<(SessionId, HandleId, usize)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                GatewayCall::Unpublish {
                    session,
                    handle,
                    live_tracks,
                    ..
                } => Some((session, handle, live_tracks)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }

    fn allocate(&self) -> (SessionId, HandleId) {
        (
            SessionId(self.next_session.fetch_add(1, Ordering::SeqCst)),
            HandleId(self.next_handle.fetch_add(1, Ordering::SeqCst)),
        )
    }
}

#[async_trait]
impl SignalingGateway for FakeGateway {
    async fn publish(
        &self,
        room: &RoomId,
        offer: &SessionDescription,
        kind: FeedKind,
    ) -> Result<PublishReply> {
        self.record(GatewayCall::Publish {
            room: room.clone(),
            kind,
            offer: offer.clone(),
        });
        let (error, without_answer) = {
            let script = lock(&self.script);
            (script.publish_error.clone(), script.publish_without_answer)
        };
        let (session_id, handle_id) = self.allocate();
        let remote_description = if without_answer || error.is_some() {
            None
        } else {
            Some(SessionDescription::answer(
                "v=0\r\no=janus 1 1 IN IP4 10.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n",
            ))
        };
        Ok(PublishReply {
            session_id,
            handle_id,
            remote_description,
            error,
        })
    }

    async fn subscribe(&self, room: &RoomId, feed: FeedId) -> Result<SubscribeReply> {
        self.record(GatewayCall::Subscribe {
            room: room.clone(),
            feed,
        });
        let (error, without_offer) = {
            let mut script = lock(&self.script);
            let error = if script.subscribe_failures_left > 0 {
                script.subscribe_failures_left -= 1;
                Some(format!("feed {} not ready", feed))
            } else {
                script.subscribe_error.clone()
            };
            (error, script.subscribe_without_offer)
        };
        let (session_id, handle_id) = self.allocate();
        let offer = if without_offer || error.is_some() {
            None
        } else {
            Some(SessionDescription::offer(
                "v=0\r\no=janus 2 1 IN IP4 10.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            ))
        };
        Ok(SubscribeReply {
            session_id,
            handle_id,
            offer,
            error,
        })
    }

    async fn start_subscribe(
        &self,
        session: SessionId,
        handle: HandleId,
        answer: &SessionDescription,
    ) -> Result<GatewayAck> {
        self.record(GatewayCall::StartSubscribe {
            session,
            handle,
            answer: answer.clone(),
        });
        let error = lock(&self.script).start_subscribe_error.clone();
        Ok(GatewayAck { error })
    }

    async fn unpublish(&self, room: &RoomId, session: SessionId, handle: HandleId) -> Result<GatewayAck> {
        let (live_tracks, error, unreachable) = {
            let script = lock(&self.script);
            (
                script.observed_tracks.iter().filter(|t| t.is_live()).count(),
                script.unpublish_error.clone(),
                script.unpublish_unreachable,
            )
        };
        self.record(GatewayCall::Unpublish {
            room: room.clone(),
            session,
            handle,
            live_tracks,
        });
        if unreachable {
            return Err(ClassroomError::Gateway("gateway unreachable".to_string()));
        }
        Ok(GatewayAck { error })
    }

    async fn keep_alive(&self, _session: SessionId) -> Result<GatewayAck> {
        let count = self.keep_alives.fetch_add(1, Ordering::SeqCst) + 1;
        let failure = lock(&self.script).keep_alive_failure.clone();
        match failure {
            Some((ok_count, reason)) if count > u64::from(ok_count) => Ok(GatewayAck::rejected(reason)),
            _ => Ok(GatewayAck::ok()),
        }
    }
}
