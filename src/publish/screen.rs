//! Screen share publishing
//!
//! Behaves like `MediaPublisher` with display capture in place of the
//! camera. When the user stops sharing from the platform's own picker, the
//! captured video track ends and the share is unpublished exactly as if
//! `unpublish` had been called.

use std::sync::Arc;
use tokio::sync::watch;

use super::core::PublisherCore;
use super::session::PeerSessionInfo;
use crate::config::ClassroomConfig;
use crate::errors::Result;
use crate::gateway::SignalingGateway;
use crate::media::{DisplayConstraints, MediaDevices};
use crate::types::{FeedKind, RoomId};
use crate::webrtc::TransportFactory;

pub struct ScreenPublisher {
    core: Arc<PublisherCore>,
    devices: Arc<dyn MediaDevices>,
}

impl ScreenPublisher {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        gateway: Arc<dyn SignalingGateway>,
        transports: Arc<dyn TransportFactory>,
        config: ClassroomConfig,
    ) -> Self {
        Self {
            core: Arc::new(PublisherCore::new(FeedKind::Screen, gateway, transports, config)),
            devices,
        }
    }

    pub async fn publish(&self, room: &RoomId) -> Result<PeerSessionInfo> {
        let devices = Arc::clone(&self.devices);
        self.core
            .publish(
                room,
                move || async move {
                    devices
                        .get_display_media(&DisplayConstraints::default())
                        .await
                },
                true,
            )
            .await
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

    pub fn watch_status(&self) -> watch::Receiver<Option<PeerSessionInfo>> {
        self.core.watch_status()
    }
}
