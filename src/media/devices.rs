//! Capture device acquisition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::track::MediaStream;
use crate::errors::MediaError;

/// Constraints for camera/microphone acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: bool,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn camera_and_microphone() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }

    pub fn microphone_only() -> Self {
        Self {
            video: false,
            audio: true,
        }
    }
}

/// Constraints for display capture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConstraints {
    /// Also capture system audio when the platform offers it
    pub system_audio: bool,
}

/// Platform media devices.
///
/// Every stream returned is exclusively owned by the caller, which must
/// stop its tracks when done with them.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> Result<MediaStream, MediaError>;

    async fn get_display_media(
        &self,
        constraints: &DisplayConstraints,
    ) -> Result<MediaStream, MediaError>;
}
