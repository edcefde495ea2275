//! Gateway-correlated peer session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::media::{MediaTrack, TrackKind};
use crate::types::{Direction, HandleId, RoomId, SessionId};
use crate::webrtc::{GatheringOutcome, PeerTransport};

/// One negotiated media flow between this client and the gateway.
///
/// The session owns its local tracks and its transport.
pub struct PeerSession {
    room_id: RoomId,
    direction: Direction,
    session_id: SessionId,
    handle_id: HandleId,
    transport: Arc<dyn PeerTransport>,
    local_tracks: Vec<MediaTrack>,
    gathering: GatheringOutcome,
    created_at: DateTime<Utc>,
}

impl PeerSession {
    pub(crate) fn new(
        room_id: RoomId,
        direction: Direction,
        ids: (SessionId, HandleId),
        transport: Arc<dyn PeerTransport>,
        local_tracks: Vec<MediaTrack>,
        gathering: GatheringOutcome,
    ) -> Self {
        Self {
            room_id,
            direction,
            session_id: ids.0,
            handle_id: ids.1,
            transport,
            local_tracks,
            gathering,
            created_at: Utc::now(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn local_tracks(&self) -> &[MediaTrack] {
        &self.local_tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&MediaTrack> {
        self.local_tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stop every local track and close the transport
    pub(crate) async fn release(&self) {
        for track in &self.local_tracks {
            track.stop();
        }
        if let Err(e) = self.transport.close().await {
            log::warn!("Failed to close transport {}: {}", self.transport.id(), e);
        }
    }

    pub fn info(&self) -> PeerSessionInfo {
        PeerSessionInfo {
            room_id: self.room_id.clone(),
            direction: self.direction,
            session_id: self.session_id,
            handle_id: self.handle_id,
            transport_id: self.transport.id().to_string(),
            local_track_count: self.local_tracks.len(),
            gathering_complete: self.gathering == GatheringOutcome::Complete,
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a `PeerSession`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerSessionInfo {
    pub room_id: RoomId,
    pub direction: Direction,
    pub session_id: SessionId,
    pub handle_id: HandleId,
    pub transport_id: String,
    pub local_track_count: usize,
    pub gathering_complete: bool,
    pub created_at: DateTime<Utc>,
}
