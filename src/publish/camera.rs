//! Camera and microphone publishing

use std::sync::Arc;
use tokio::sync::watch;

use super::core::PublisherCore;
use super::session::PeerSessionInfo;
use crate::config::ClassroomConfig;
use crate::errors::Result;
use crate::gateway::SignalingGateway;
use crate::media::{MediaConstraints, MediaDevices, TrackKind};
use crate::types::{FeedKind, RoomId};
use crate::webrtc::TransportFactory;

/// Publishes the local camera and microphone to one room at a time
pub struct MediaPublisher {
    core: Arc<PublisherCore>,
    devices: Arc<dyn MediaDevices>,
}

impl MediaPublisher {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        gateway: Arc<dyn SignalingGateway>,
        transports: Arc<dyn TransportFactory>,
        config: ClassroomConfig,
    ) -> Self {
        Self {
            core: Arc::new(PublisherCore::new(FeedKind::Camera, gateway, transports, config)),
            devices,
        }
    }

    /// Publish camera and microphone to `room`. A no-op returning the
    /// existing session when this room is already published.
    pub async fn publish(&self, room: &RoomId) -> Result<PeerSessionInfo> {
        let devices = Arc::clone(&self.devices);
        self.core
            .publish(
                room,
                move || async move {
                    devices
                        .get_user_media(&MediaConstraints::camera_and_microphone())
                        .await
                },
                false,
            )
            .await
    }

    /// Returns whether the camera is now enabled
    pub async fn toggle_camera(&self) -> Result<bool> {
        self.core.toggle(TrackKind::Video).await
    }

    /// Returns whether the microphone is now enabled
    pub async fn toggle_microphone(&self) -> Result<bool> {
        self.core.toggle(TrackKind::Audio).await
    }

    pub async fn unpublish(&self, room: &RoomId) -> Result<()> {
        self.core.unpublish(room).await
    }

    pub async fn session(&self) -> Option<PeerSessionInfo> {
        self.core.session().await
    }

    pub async fn is_published(&self, room: &RoomId) -> bool {
        self.core.is_published(room).await
    }

    /// Follow publish/unpublish transitions, including automatic ones
    pub fn watch_status(&self) -> watch::Receiver<Option<PeerSessionInfo>> {
        self.core.watch_status()
    }
}
